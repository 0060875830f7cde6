use crate::{Health, Listen};
use hyper::{server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use std::{
    convert::Infallible,
    future::Future,
    io,
    net::{Ipv4Addr, SocketAddr},
};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
    time::{self, Duration},
};
use tracing::{debug, info_span, Instrument};

/// Accept errors (e.g. running out of file descriptors) tend to repeat immediately.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Serves health checks over HTTP on every address of the node.
#[derive(Clone, Debug, Default)]
pub struct TcpListen(());

/// A running listener. Dropping it closes the listener and every open connection.
#[derive(Debug)]
pub struct Listening {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

// === impl TcpListen ===

impl Listen for TcpListen {
    type Handle = Listening;

    fn listen(&self, port: u16, health: Health) -> io::Result<Listening> {
        let std = std::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
        std.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std)?;
        let local_addr = listener.local_addr()?;
        let span = info_span!("healthcheck", service = %health.service(), %port);
        let task = tokio::spawn(serve(listener, health).instrument(span));
        Ok(Listening { local_addr, task })
    }
}

trait Accept: Send + Sync + 'static {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

async fn serve<A: Accept>(listener: A, health: Health) {
    let mut conns = tokio::task::JoinSet::new();
    loop {
        let (stream, client) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                debug!(%error, "Failed to accept connection");
                time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        let health = health.clone();
        conns.spawn(async move {
            let svc = service_fn(move |_req| {
                let rsp = health.respond();
                async move { Ok::<_, Infallible>(rsp) }
            });
            if let Err(error) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), svc)
                .await
            {
                debug!(%client, %error, "Connection failed");
            }
        });
        // Reap finished connections.
        while conns.try_join_next().is_some() {}
    }
}

impl Accept for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

// === impl Listening ===

impl Listening {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for Listening {
    fn drop(&mut self) {
        self.task.abort();
    }
}
