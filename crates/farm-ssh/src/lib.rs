mod ssh_transport;

pub use ssh_transport::SshTransport;
