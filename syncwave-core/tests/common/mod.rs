//! Shared harness for tests that run a real server on an ephemeral port

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use syncwave_core::config::Config;
use syncwave_core::service::{serve, RealtimeService};
use syncwave_core::shutdown::ShutdownCoordinator;
use syncwave_core::test_utils::{eventually, test_config, test_service};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub struct TestServer {
    pub addr: SocketAddr,
    pub service: Arc<RealtimeService>,
    pub shutdown: Arc<ShutdownCoordinator>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(test_config()).await
    }

    pub async fn start_with(config: Config) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new(config.server.shutdown_timeout));
        let service = test_service(config);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(serve(service.clone(), listener, shutdown.clone()));

        let ready = service.clone();
        assert!(
            eventually(Duration::from_secs(2), move || {
                let ready = ready.clone();
                async move { ready.is_connected() }
            })
            .await,
            "server did not connect"
        );

        TestServer {
            addr,
            service,
            shutdown,
            task,
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Signal shutdown and wait for the server task to return.
    pub async fn stop(self) {
        self.shutdown.shutdown().await;
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
            .expect("server returned an error");
    }
}
