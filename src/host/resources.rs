//! Host-side network resources.
//!
//! The protocol engines themselves live outside this crate; these types
//! implement their interface contract — event registration slots, ordered
//! delivery on the owning context, close semantics — with synthetic delivery
//! hooks standing in for the transport, so the bridge above them is
//! exercised end to end.

use crate::error::CompletionError;
use crate::handler::{CallbackArgs, NativeArg, WrappedHandler};
use crate::host::context::ContextHandle;
use crate::value::ConfigTree;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Event names used by resource handler slots
pub mod events {
    /// New inbound connection on a server
    pub const CONNECT: &str = "connect";
    /// Data arrived on a socket
    pub const DATA: &str = "data";
    /// Socket write queue drained
    pub const DRAIN: &str = "drain";
    /// Peer half-closed the socket
    pub const END: &str = "end";
    /// Socket fully closed
    pub const CLOSE: &str = "close";
    /// HTTP request arrived on a server
    pub const REQUEST: &str = "request";
    /// SockJS socket opened on a bridged HTTP server
    pub const SOCKJS_SOCKET: &str = "sockjs-socket";
}

/// Identifier for one handler registration on a resource
pub type RegistrationId = u64;

/// Per-resource registry of event handler registrations.
///
/// Events for one resource are dispatched in delivery order onto the
/// resource's owning context, so they never interleave with each other.
/// `close` flips the closed flag under the same lock used by `dispatch`:
/// once close returns, no registered handler will be invoked again.
pub struct EventHub {
    slots: Mutex<HashMap<&'static str, Vec<(RegistrationId, WrappedHandler)>>>,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl EventHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for an event; returns a registration id
    pub fn register(&self, event: &'static str, handler: WrappedHandler) -> RegistrationId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().entry(event).or_default().push((id, handler));
        id
    }

    /// Remove one registration, releasing its handler.
    ///
    /// Returns `false` for unknown ids (unregistering twice is not an error).
    pub fn unregister(&self, event: &'static str, id: RegistrationId) -> bool {
        let mut slots = self.slots.lock();
        if let Some(handlers) = slots.get_mut(event) {
            if let Some(pos) = handlers.iter().position(|(hid, _)| *hid == id) {
                let (_, handler) = handlers.remove(pos);
                handler.release();
                return true;
            }
        }
        false
    }

    /// Dispatch an event to every registration; returns how many handlers
    /// were queued. A closed hub dispatches nothing.
    pub fn dispatch(&self, event: &'static str, args: CallbackArgs) -> usize {
        let slots = self.slots.lock();
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        match slots.get(event) {
            Some(handlers) => handlers
                .iter()
                .filter(|(_, h)| h.dispatch(args.clone()))
                .count(),
            None => 0,
        }
    }

    /// Close the hub and release every handler
    pub fn close(&self) {
        let mut slots = self.slots.lock();
        self.closed.store(true, Ordering::Release);
        for (_, handlers) in slots.drain() {
            for (_, handler) in handlers {
                handler.release();
            }
        }
    }

    /// Whether the hub has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Host-side TCP server resource
pub struct NetServer {
    context: ContextHandle,
    hub: EventHub,
    port: Mutex<Option<u16>>,
}

impl NetServer {
    /// Create a server owned by the given context
    pub fn new(context: ContextHandle) -> Arc<Self> {
        Arc::new(Self {
            context,
            hub: EventHub::new(),
            port: Mutex::new(None),
        })
    }

    /// The owning context
    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    /// The handler registry
    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Begin listening; completes asynchronously, error-first.
    pub fn listen(&self, port: u16, completion: Option<WrappedHandler>) {
        if self.hub.is_closed() {
            if let Some(handler) = completion {
                handler.dispatch(CallbackArgs::Completion(Err(CompletionError::new(
                    crate::error::CompletionCode::ListenFailed,
                    "Server is closed",
                ))));
            }
            return;
        }

        *self.port.lock() = Some(port);
        debug!(port = port, "Net server listening");
        if let Some(handler) = completion {
            handler.dispatch(CallbackArgs::Completion(Ok(None)));
        }
    }

    /// The port this server is listening on, if any
    pub fn listening_port(&self) -> Option<u16> {
        *self.port.lock()
    }

    /// Close the server; after this returns no connect handler fires again.
    pub fn close(&self) {
        self.hub.close();
        *self.port.lock() = None;
    }

    /// Transport hook: deliver an inbound connection to connect handlers.
    pub fn deliver_connection(&self, socket: Arc<NetSocket>) -> usize {
        self.hub.dispatch(
            events::CONNECT,
            CallbackArgs::Value(NativeArg::Opaque(socket)),
        )
    }
}

/// Host-side socket resource (also used as the SockJS socket)
pub struct NetSocket {
    context: ContextHandle,
    hub: EventHub,
    written: Mutex<Vec<String>>,
}

impl NetSocket {
    /// Create a socket owned by the given context
    pub fn new(context: ContextHandle) -> Arc<Self> {
        Arc::new(Self {
            context,
            hub: EventHub::new(),
            written: Mutex::new(Vec::new()),
        })
    }

    /// The owning context
    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    /// The handler registry
    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Queue data for the peer (recorded; the transport is external)
    pub fn write(&self, data: impl Into<String>) {
        self.written.lock().push(data.into());
    }

    /// Data written so far (transport hook)
    pub fn written(&self) -> Vec<String> {
        self.written.lock().clone()
    }

    /// Transport hook: deliver inbound data to data handlers.
    pub fn deliver_data(&self, data: impl Into<String>) -> usize {
        self.hub.dispatch(
            events::DATA,
            CallbackArgs::Value(NativeArg::Tree(ConfigTree::String(data.into()))),
        )
    }

    /// Transport hook: the write queue drained.
    pub fn deliver_drain(&self) -> usize {
        self.hub.dispatch(events::DRAIN, CallbackArgs::None)
    }

    /// Transport hook: the peer half-closed. Fires end handlers, then close
    /// handlers, then closes the hub.
    pub fn deliver_end(&self) {
        self.hub.dispatch(events::END, CallbackArgs::None);
        self.hub.dispatch(events::CLOSE, CallbackArgs::None);
        self.hub.close();
    }

    /// Close the socket locally
    pub fn close(&self) {
        self.hub.dispatch(events::CLOSE, CallbackArgs::None);
        self.hub.close();
    }
}

/// Host-side TCP client resource
pub struct NetClient {
    context: ContextHandle,
    peer: Mutex<Option<Arc<NetServer>>>,
    closed: AtomicBool,
}

impl NetClient {
    /// Create a client owned by the given context
    pub fn new(context: ContextHandle) -> Arc<Self> {
        Arc::new(Self {
            context,
            peer: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// The owning context
    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    /// Transport hook: wire this client to an in-process server.
    pub fn set_peer(&self, server: Arc<NetServer>) {
        *self.peer.lock() = Some(server);
    }

    /// Connect; completes asynchronously, error-first with the socket.
    ///
    /// With an in-process peer listening on the port, a socket pair is
    /// synthesized: the server side goes to connect handlers, the client
    /// side to the completion.
    pub fn connect(&self, port: u16, completion: WrappedHandler) {
        if self.closed.load(Ordering::Acquire) {
            completion.dispatch(CallbackArgs::Completion(Err(CompletionError::new(
                crate::error::CompletionCode::ConnectFailed,
                "Client is closed",
            ))));
            return;
        }

        let peer = self.peer.lock().clone();
        match peer {
            Some(server) if server.listening_port() == Some(port) => {
                let server_side = NetSocket::new(server.context().clone());
                let client_side = NetSocket::new(self.context.clone());
                server.deliver_connection(server_side);
                completion.dispatch(CallbackArgs::Completion(Ok(Some(NativeArg::Opaque(
                    client_side,
                )))));
            }
            _ => {
                completion.dispatch(CallbackArgs::Completion(Err(CompletionError::new(
                    crate::error::CompletionCode::ConnectFailed,
                    format!("Connection refused on port {}", port),
                ))));
            }
        }
    }

    /// Close the client
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Host-side HTTP server resource
pub struct HttpServer {
    context: ContextHandle,
    hub: EventHub,
    port: Mutex<Option<u16>>,
}

impl HttpServer {
    /// Create an HTTP server owned by the given context
    pub fn new(context: ContextHandle) -> Arc<Self> {
        Arc::new(Self {
            context,
            hub: EventHub::new(),
            port: Mutex::new(None),
        })
    }

    /// The owning context
    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    /// The handler registry
    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Begin listening; completes asynchronously, error-first.
    pub fn listen(&self, port: u16, completion: Option<WrappedHandler>) {
        if self.hub.is_closed() {
            if let Some(handler) = completion {
                handler.dispatch(CallbackArgs::Completion(Err(CompletionError::new(
                    crate::error::CompletionCode::ListenFailed,
                    "Server is closed",
                ))));
            }
            return;
        }
        *self.port.lock() = Some(port);
        debug!(port = port, "HTTP server listening");
        if let Some(handler) = completion {
            handler.dispatch(CallbackArgs::Completion(Ok(None)));
        }
    }

    /// Close the server
    pub fn close(&self) {
        self.hub.close();
        *self.port.lock() = None;
    }

    /// Transport hook: deliver a request description to request handlers.
    pub fn deliver_request(&self, request: ConfigTree) -> usize {
        self.hub.dispatch(
            events::REQUEST,
            CallbackArgs::Value(NativeArg::Tree(request)),
        )
    }

    /// Transport hook: deliver an opened SockJS socket to socket handlers.
    pub fn deliver_sockjs_socket(&self, socket: Arc<NetSocket>) -> usize {
        self.hub.dispatch(
            events::SOCKJS_SOCKET,
            CallbackArgs::Value(NativeArg::Opaque(socket)),
        )
    }
}

/// Host-side HTTP client resource
pub struct HttpClient {
    context: ContextHandle,
    closed: AtomicBool,
}

impl HttpClient {
    /// Create an HTTP client owned by the given context
    pub fn new(context: ContextHandle) -> Arc<Self> {
        Arc::new(Self {
            context,
            closed: AtomicBool::new(false),
        })
    }

    /// The owning context
    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    /// Close the client
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether the client has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{CallableHandle, InvocationPolicy};
    use crate::host::context::{ContextHandle, ContextKind};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    fn test_context() -> ContextHandle {
        ContextHandle::spawn("res-test", ContextKind::EventLoop, 128).unwrap()
    }

    fn counting_handler(ctx: &ContextHandle, count: &Arc<AtomicUsize>) -> WrappedHandler {
        let c = Arc::clone(count);
        WrappedHandler::unary_converted(
            ctx.clone(),
            InvocationPolicy::Repeatable,
            CallableHandle::from_fn1(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            Arc::new(|_| Ok(crate::value::ScriptValue::Null)),
        )
    }

    fn flush(ctx: &ContextHandle) {
        let (tx, rx) = mpsc::channel();
        ctx.execute(Box::new(move || tx.send(()).unwrap())).unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn test_hub_register_dispatch_unregister() {
        let ctx = test_context();
        let hub = EventHub::new();
        let count = Arc::new(AtomicUsize::new(0));

        let id = hub.register(events::DATA, counting_handler(&ctx, &count));
        assert_eq!(
            hub.dispatch(
                events::DATA,
                CallbackArgs::Value(NativeArg::Tree(ConfigTree::Null))
            ),
            1
        );
        flush(&ctx);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(hub.unregister(events::DATA, id));
        assert!(!hub.unregister(events::DATA, id));
        assert_eq!(
            hub.dispatch(
                events::DATA,
                CallbackArgs::Value(NativeArg::Tree(ConfigTree::Null))
            ),
            0
        );
        ctx.close(Duration::from_secs(1));
    }

    #[test]
    fn test_no_dispatch_after_close() {
        let ctx = test_context();
        let server = NetServer::new(ctx.clone());
        let count = Arc::new(AtomicUsize::new(0));

        server
            .hub()
            .register(events::CONNECT, counting_handler(&ctx, &count));
        server.listen(8080, None);

        let socket = NetSocket::new(ctx.clone());
        assert_eq!(server.deliver_connection(Arc::clone(&socket)), 1);
        flush(&ctx);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        server.close();
        assert_eq!(server.deliver_connection(socket), 0);
        flush(&ctx);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        ctx.close(Duration::from_secs(1));
    }

    #[test]
    fn test_close_suppresses_already_queued_dispatch() {
        let ctx = test_context();
        let server = NetServer::new(ctx.clone());
        let count = Arc::new(AtomicUsize::new(0));

        server
            .hub()
            .register(events::CONNECT, counting_handler(&ctx, &count));
        server.listen(8080, None);

        // Hold the context busy so the delivery below stays queued.
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        ctx.execute(Box::new(move || {
            gate_rx.recv().unwrap();
        }))
        .unwrap();

        let socket = NetSocket::new(ctx.clone());
        assert_eq!(server.deliver_connection(socket), 1);
        server.close();
        assert!(server.hub().is_closed());

        gate_tx.send(()).unwrap();
        flush(&ctx);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        ctx.close(Duration::from_secs(1));
    }

    #[test]
    fn test_socket_event_order() {
        let ctx = test_context();
        let socket = NetSocket::new(ctx.clone());
        let (tx, rx) = mpsc::channel();

        for event in [events::DATA, events::DRAIN, events::END, events::CLOSE] {
            let tx = tx.clone();
            let handler = if event == events::DATA {
                WrappedHandler::unary(
                    ctx.clone(),
                    InvocationPolicy::Repeatable,
                    CallableHandle::from_fn1(move |_| {
                        tx.send("data").unwrap();
                        Ok(())
                    }),
                )
            } else {
                let name = event;
                WrappedHandler::nullary(
                    ctx.clone(),
                    InvocationPolicy::Repeatable,
                    CallableHandle::from_fn0(move || {
                        tx.send(name).unwrap();
                        Ok(())
                    }),
                )
            };
            socket.hub().register(event, handler);
        }

        socket.deliver_data("hello");
        assert_eq!(socket.deliver_drain(), 1);
        socket.deliver_end();
        flush(&ctx);

        let order: Vec<&str> = rx.try_iter().collect();
        assert_eq!(order, vec!["data", "drain", "end", "close"]);
        ctx.close(Duration::from_secs(1));
    }

    #[test]
    fn test_client_connect_refused_without_peer() {
        let ctx = test_context();
        let client = NetClient::new(ctx.clone());
        let (tx, rx) = mpsc::channel();

        let completion = WrappedHandler::error_first(
            ctx.clone(),
            InvocationPolicy::SingleShot,
            CallableHandle::from_fn2(move |err, sock| {
                tx.send((err, sock)).unwrap();
                Ok(())
            }),
        );

        client.connect(9999, completion);
        let (err, sock) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(!err.is_null());
        assert!(sock.is_null());
        ctx.close(Duration::from_secs(1));
    }

    #[test]
    fn test_client_connect_to_in_process_server() {
        let ctx = test_context();
        let server = NetServer::new(ctx.clone());
        server.listen(7000, None);

        let connections = Arc::new(AtomicUsize::new(0));
        server
            .hub()
            .register(events::CONNECT, counting_handler(&ctx, &connections));

        let client = NetClient::new(ctx.clone());
        client.set_peer(Arc::clone(&server));

        let (tx, rx) = mpsc::channel();
        let completion = WrappedHandler::error_first_converted(
            ctx.clone(),
            InvocationPolicy::SingleShot,
            CallableHandle::from_fn2(move |err, sock| {
                tx.send((err, sock)).unwrap();
                Ok(())
            }),
            Arc::new(|arg| match arg {
                NativeArg::Opaque(raw) if raw.downcast_ref::<NetSocket>().is_some() => {
                    Ok(crate::value::ScriptValue::from("socket"))
                }
                _ => Err(crate::error::HandlerFault::script("unexpected argument")),
            }),
        );
        client.connect(7000, completion);

        let (err, sock) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(err.is_null());
        assert_eq!(sock.as_str(), Some("socket"));
        flush(&ctx);
        assert_eq!(connections.load(Ordering::SeqCst), 1);
        ctx.close(Duration::from_secs(1));
    }

    #[test]
    fn test_http_server_request_dispatch() {
        let ctx = test_context();
        let server = HttpServer::new(ctx.clone());
        server.listen(8080, None);

        let (tx, rx) = mpsc::channel();
        server.hub().register(
            events::REQUEST,
            WrappedHandler::unary(
                ctx.clone(),
                InvocationPolicy::Repeatable,
                CallableHandle::from_fn1(move |req| {
                    tx.send(req).unwrap();
                    Ok(())
                }),
            ),
        );

        let request = ConfigTree::Object(
            [
                ("method".to_string(), ConfigTree::String("GET".into())),
                ("uri".to_string(), ConfigTree::String("/".into())),
            ]
            .into(),
        );
        server.deliver_request(request);

        let req = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(req.get("method").and_then(|v| v.as_str()), Some("GET"));
        ctx.close(Duration::from_secs(1));
    }
}
