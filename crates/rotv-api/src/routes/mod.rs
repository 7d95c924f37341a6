mod gateway;

pub use gateway::router;
