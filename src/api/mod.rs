pub mod middleware;
pub mod publish;
pub mod server;
