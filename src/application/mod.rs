// Application layer - Caching, aggregation, synthesis and the collector
pub mod aggregator;
pub mod collector;
pub mod datapoint_cache;
pub mod dependency_graph;
pub mod formula;
pub mod series_repository;
