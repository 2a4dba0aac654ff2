// Dependency graph between synthetic series and the series they read
use crate::application::formula::FormulaEngine;
use crate::domain::datapoint::{SeriesConfig, SeriesId};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Edges derived from every synthetic formula at metadata sync time.
///
/// `dependents` maps a synthetic series to the series it reads and
/// `dependees` is the reverse edge. Series on a cycle are reported as cyclic
/// and left out of the synthesis order together with anything that reads them.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    dependents: HashMap<SeriesId, Vec<SeriesId>>,
    dependees: HashMap<SeriesId, Vec<SeriesId>>,
    unresolved: HashMap<SeriesId, Vec<String>>,
    cyclic: HashSet<SeriesId>,
    synthesis_order: Vec<SeriesId>,
}

impl DependencyGraph {
    pub fn build(configs: &[SeriesConfig], formulas: &dyn FormulaEngine) -> Self {
        let by_name: HashMap<&str, SeriesId> = configs.iter().map(|c| (c.name.as_str(), c.id)).collect();
        let mut graph = DependencyGraph::default();

        for config in configs.iter().filter(|c| c.is_synthetic()) {
            let formula = config.formula.as_deref().unwrap_or_default();
            for name in formulas.dependency_names(formula) {
                match by_name.get(name.as_str()) {
                    Some(&id) if id == config.id => {
                        tracing::warn!("Series {} references itself, ignoring [{}]", config.id, name);
                    }
                    Some(&id) => {
                        push_unique(graph.dependents.entry(config.id).or_default(), id);
                        push_unique(graph.dependees.entry(id).or_default(), config.id);
                    }
                    None => {
                        tracing::debug!("Series {} references unknown series [{}]", config.id, name);
                        graph.unresolved.entry(config.id).or_default().push(name);
                    }
                }
            }
        }

        let synthetic: HashSet<SeriesId> = configs.iter().filter(|c| c.is_synthetic()).map(|c| c.id).collect();
        let mut marks = HashMap::new();
        let mut blocked = HashSet::new();
        let mut stack = Vec::new();
        for config in configs {
            graph.visit(config.id, &synthetic, &mut marks, &mut blocked, &mut stack);
        }

        if !graph.cyclic.is_empty() {
            tracing::warn!("Dependency cycle between series {:?}", graph.cyclic);
        }
        graph
    }

    fn visit(
        &mut self,
        id: SeriesId,
        synthetic: &HashSet<SeriesId>,
        marks: &mut HashMap<SeriesId, Mark>,
        blocked: &mut HashSet<SeriesId>,
        stack: &mut Vec<SeriesId>,
    ) {
        match marks.get(&id) {
            Some(Mark::Done) => return,
            Some(Mark::Visiting) => {
                // Everything on the stack from the first visit of `id` is on the cycle.
                if let Some(position) = stack.iter().position(|&s| s == id) {
                    self.cyclic.extend(stack[position..].iter().copied());
                }
                return;
            }
            None => {}
        }

        marks.insert(id, Mark::Visiting);
        stack.push(id);

        let children = self.dependents.get(&id).cloned().unwrap_or_default();
        for &child in &children {
            self.visit(child, synthetic, marks, blocked, stack);
        }

        stack.pop();
        marks.insert(id, Mark::Done);

        if self.cyclic.contains(&id) || children.iter().any(|c| blocked.contains(c)) {
            blocked.insert(id);
        } else if synthetic.contains(&id) {
            self.synthesis_order.push(id);
        }
    }

    /// Series `id` reads from.
    pub fn dependents(&self, id: SeriesId) -> &[SeriesId] {
        self.dependents.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Series that read from `id`.
    pub fn dependees(&self, id: SeriesId) -> &[SeriesId] {
        self.dependees.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn unresolved(&self, id: SeriesId) -> &[String] {
        self.unresolved.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_cyclic(&self, id: SeriesId) -> bool {
        self.cyclic.contains(&id)
    }

    /// Synthetic series in an order where every synthetic dependency comes first.
    pub fn synthesis_order(&self) -> &[SeriesId] {
        &self.synthesis_order
    }
}

fn push_unique(ids: &mut Vec<SeriesId>, id: SeriesId) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}
