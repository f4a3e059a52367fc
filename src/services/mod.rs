pub mod middleware;
pub mod registry;
pub mod resolver;
pub mod transport;

pub use registry::{MemoryRegistry, NoopRegistry, ServiceInstance};
pub use transport::{GrpcClient, GrpcServer, Server};
