mod local_transport;

pub use local_transport::LocalTransport;
