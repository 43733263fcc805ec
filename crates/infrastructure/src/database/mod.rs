//! 仓储实现

pub mod memory;

pub use memory::{
    MemoryAnalystRepository, MemoryClusterLockRepository, MemoryJobRepository, MemoryRepositories,
    MemoryStore, MemoryTaskErrorRepository, MemoryTaskRepository,
};
