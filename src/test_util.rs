use crate::prelude::*;

pub fn from_commented_json<T>(input: &str) -> T
where
    T: serde::de::DeserializeOwned,
{
    static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"#.*").unwrap());

    let replaced = COMMENT.replace_all(input, "");
    serde_json::from_str(&replaced).unwrap()
}

/// A throwaway static file server for fetch/cache tests. Serves `root` over HTTP on a
/// random localhost port for as long as the returned value is alive; the background
/// runtime and server task are torn down together on drop.
pub struct StaticHTTPServer {
    base: Url,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    runtime: Option<tokio::runtime::Runtime>,
}

impl StaticHTTPServer {
    pub fn new(root: &std::path::Path) -> StaticHTTPServer {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_io()
            .enable_time()
            .build()
            .expect("failed to start test HTTP server runtime");

        let (addr_tx, addr_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let root = root.to_owned();

        runtime.spawn(async move {
            let routes = warp::fs::dir(root);
            let (addr, server) = warp::serve(routes).bind_with_graceful_shutdown(
                ([127, 0, 0, 1], 0),
                async move {
                    shutdown_rx.await.ok();
                },
            );
            addr_tx.send(addr).expect("test harness dropped receiver");
            server.await;
        });

        let addr = addr_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("test HTTP server failed to start");

        StaticHTTPServer {
            base: Url::parse(&format!("http://{addr}/")).unwrap(),
            shutdown: Some(shutdown_tx),
            runtime: Some(runtime),
        }
    }

    pub fn url(&self, path: &str) -> Url {
        self.base.join(path).unwrap()
    }
}

impl Drop for StaticHTTPServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
