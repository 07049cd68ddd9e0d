//! TCP accept loop feeding the DICOM SCP dispatcher (`spec.md` §4.6 "Lifecycle").
//!
//! Grounded on the teacher's own `server.rs`: a bounded [`ThreadPool`], one
//! opentelemetry "association" span per accepted connection, and an optional
//! finite-connection cutoff kept for test harnesses.

use std::net::{SocketAddrV4, TcpListener, TcpStream};
use std::sync::Arc;

use opentelemetry::trace::{Status, TraceContextExt, Tracer};
use opentelemetry::{global, Context, KeyValue};
use opentelemetry_semantic_conventions as semconv;

use crate::environment::ServerEnvironment;
use crate::scp::handle_association;
use crate::threads::ThreadPool;

/// `finite_connections` is only used for testing. It tells the server to
/// exit after a finite number of connections instead of running forever.
pub fn run_server(
    address: &SocketAddrV4,
    env: Arc<ServerEnvironment>,
    finite_connections: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(address)?;
    tracing::info!("listening on: tcp://{}", address);

    let mut pool = ThreadPool::new(env.settings.listener_threads);

    let incoming: Box<dyn Iterator<Item = Result<TcpStream, std::io::Error>>> = if let Some(n) = finite_connections {
        Box::new(listener.incoming().take(n))
    } else {
        Box::new(listener.incoming())
    };

    let tracer = global::tracer(env!("CARGO_PKG_NAME"));
    for stream in incoming {
        let env = Arc::clone(&env);
        tracer.in_span("association", |cx| match stream {
            Ok(scu_stream) => {
                pool.execute(move || {
                    let _context_guard = cx.attach();
                    let context = Context::current();
                    if let Ok(address) = scu_stream.peer_addr() {
                        context.span().set_attributes(vec![
                            KeyValue::new(semconv::trace::CLIENT_ADDRESS, address.ip().to_string()),
                            KeyValue::new(semconv::trace::CLIENT_PORT, address.port() as i64),
                        ]);
                    }
                    match handle_association(scu_stream, &env) {
                        Ok(()) => context.span().set_status(Status::Ok),
                        Err(e) => {
                            tracing::error!("{:?}", e);
                            context.span().set_status(Status::error(e.to_string()))
                        }
                    }
                });
            }
            Err(e) => cx.span().set_status(Status::error(e.to_string())),
        })
    }
    pool.shutdown();
    env.shutdown();
    Ok(())
}
