use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CollectorConfig {
    #[serde(default)]
    pub collector: CollectorSettings,
    #[serde(default)]
    pub seed: SeedSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectorSettings {
    /// Datapoints kept before the display window and fed into trends
    #[serde(default = "default_history")]
    pub history: usize,
    #[serde(default = "default_true")]
    pub disable_new_by_default: bool,
    /// Bucket series without a configured period by the display period
    #[serde(default = "default_true")]
    pub auto_aggregate: bool,
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_first_year")]
    pub calendar_first_year: i32,
    #[serde(default = "default_last_year")]
    pub calendar_last_year: i32,
    /// Width of the window the binary gathers, ending now
    #[serde(default = "default_display_days")]
    pub display_days: i64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            history: default_history(),
            disable_new_by_default: true,
            auto_aggregate: true,
            utc_offset_minutes: 0,
            calendar_first_year: default_first_year(),
            calendar_last_year: default_last_year(),
            display_days: default_display_days(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeedSettings {
    #[serde(default = "default_seed_path")]
    pub path: String,
}

impl Default for SeedSettings {
    fn default() -> Self {
        Self {
            path: default_seed_path(),
        }
    }
}

fn default_history() -> usize {
    20
}

fn default_true() -> bool {
    true
}

fn default_first_year() -> i32 {
    1970
}

fn default_last_year() -> i32 {
    2100
}

fn default_display_days() -> i64 {
    30
}

fn default_seed_path() -> String {
    "config/seed.toml".to_string()
}

/// Loads `config/collector.toml` (optional) overlaid by
/// `TREND_COLLECTOR__SECTION__KEY` environment variables.
pub fn load_collector_config() -> anyhow::Result<CollectorConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/collector").required(false))
        .add_source(config::Environment::with_prefix("TREND_COLLECTOR").separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}
