//! 阶段依赖图与执行顺序

pub mod graph;

pub use graph::StageGraph;
