//! TCP server, client and socket façades.

use crate::error::HandlerFault;
use crate::facades::Registration;
use crate::handler::{ArgConverter, CallableHandle, InvocationPolicy, NativeArg, WrappedHandler};
use crate::host::context::ContextHandle;
use crate::host::resources::{events, NetClient, NetServer, NetSocket};
use crate::value::{ConfigTree, Facade, FacadeRef, ScriptValue};
use std::any::Any;
use std::sync::Arc;

/// Converter wrapping an opaque socket argument in a [`NetSocketFacade`].
///
/// The façade is bound to the socket's own context, so handlers registered
/// through it keep the socket's thread affinity.
pub(crate) fn socket_converter() -> ArgConverter {
    Arc::new(|arg| match arg {
        NativeArg::Opaque(raw) => match Arc::clone(raw).downcast::<NetSocket>() {
            Ok(socket) => Ok(ScriptValue::Facade(FacadeRef::new(Arc::new(
                NetSocketFacade::from_resource(socket),
            )))),
            Err(_) => Err(HandlerFault::script("Expected a socket argument")),
        },
        NativeArg::Tree(_) => Err(HandlerFault::script("Expected a socket argument")),
    })
}

/// Scripting façade over a host TCP server
pub struct NetServerFacade {
    inner: Arc<NetServer>,
    context: ContextHandle,
    options: Option<ConfigTree>,
}

impl NetServerFacade {
    /// Create a server owned by the given context, with already-marshalled
    /// creation options (SSL, buffer sizing, ... — interpreted by the host)
    pub fn new(context: ContextHandle, options: Option<ConfigTree>) -> Self {
        Self {
            inner: NetServer::new(context.clone()),
            context,
            options,
        }
    }

    /// Options supplied at creation, if any
    pub fn options(&self) -> Option<&ConfigTree> {
        self.options.as_ref()
    }

    /// Register a repeatable connect handler; the handler receives a
    /// [`NetSocketFacade`] per inbound connection.
    pub fn connect_handler(&self, callable: CallableHandle) -> Registration {
        let handler = WrappedHandler::unary_converted(
            self.context.clone(),
            InvocationPolicy::Repeatable,
            callable,
            socket_converter(),
        );
        let id = self.inner.hub().register(events::CONNECT, handler);
        let server = Arc::clone(&self.inner);
        Registration::new(move || server.hub().unregister(events::CONNECT, id))
    }

    /// Begin listening; the optional completion is error-first.
    pub fn listen(&self, port: u16, completion: Option<CallableHandle>) {
        let completion = completion.map(|callable| {
            WrappedHandler::error_first(self.context.clone(), InvocationPolicy::SingleShot, callable)
        });
        self.inner.listen(port, completion);
    }

    /// Close the server and release all its handlers
    pub fn close(&self) {
        self.inner.close();
    }

    /// The underlying host resource
    pub fn resource(&self) -> &Arc<NetServer> {
        &self.inner
    }
}

impl std::fmt::Debug for NetServerFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetServerFacade")
            .field("port", &self.inner.listening_port())
            .field("options", &self.options)
            .finish()
    }
}

impl Facade for NetServerFacade {
    fn facade_kind(&self) -> &'static str {
        "net-server"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Scripting façade over a host TCP client
pub struct NetClientFacade {
    inner: Arc<NetClient>,
    context: ContextHandle,
    options: Option<ConfigTree>,
}

impl NetClientFacade {
    /// Create a client owned by the given context, with already-marshalled
    /// creation options
    pub fn new(context: ContextHandle, options: Option<ConfigTree>) -> Self {
        Self {
            inner: NetClient::new(context.clone()),
            context,
            options,
        }
    }

    /// Options supplied at creation, if any
    pub fn options(&self) -> Option<&ConfigTree> {
        self.options.as_ref()
    }

    /// Connect to a port; the callable is error-first and receives a
    /// [`NetSocketFacade`] on success.
    pub fn connect(&self, port: u16, callable: CallableHandle) {
        let completion = WrappedHandler::error_first_converted(
            self.context.clone(),
            InvocationPolicy::SingleShot,
            callable,
            socket_converter(),
        );
        self.inner.connect(port, completion);
    }

    /// Close the client
    pub fn close(&self) {
        self.inner.close();
    }

    /// The underlying host resource
    pub fn resource(&self) -> &Arc<NetClient> {
        &self.inner
    }
}

impl std::fmt::Debug for NetClientFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetClientFacade")
            .field("options", &self.options)
            .finish()
    }
}

impl Facade for NetClientFacade {
    fn facade_kind(&self) -> &'static str {
        "net-client"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Scripting façade over a host socket
pub struct NetSocketFacade {
    inner: Arc<NetSocket>,
    context: ContextHandle,
}

impl NetSocketFacade {
    pub(crate) fn from_resource(inner: Arc<NetSocket>) -> Self {
        let context = inner.context().clone();
        Self { inner, context }
    }

    /// Register a repeatable data handler; the handler receives the payload
    /// as a string value.
    pub fn data_handler(&self, callable: CallableHandle) -> Registration {
        self.register(events::DATA, ArityKind::Unary, callable)
    }

    /// Register a repeatable drain handler
    pub fn drain_handler(&self, callable: CallableHandle) -> Registration {
        self.register(events::DRAIN, ArityKind::Nullary, callable)
    }

    /// Register a repeatable end handler, fired when the peer half-closes
    pub fn end_handler(&self, callable: CallableHandle) -> Registration {
        self.register(events::END, ArityKind::Nullary, callable)
    }

    /// Register a repeatable close handler
    pub fn close_handler(&self, callable: CallableHandle) -> Registration {
        self.register(events::CLOSE, ArityKind::Nullary, callable)
    }

    fn register(
        &self,
        event: &'static str,
        arity: ArityKind,
        callable: CallableHandle,
    ) -> Registration {
        let handler = match arity {
            ArityKind::Nullary => WrappedHandler::nullary(
                self.context.clone(),
                InvocationPolicy::Repeatable,
                callable,
            ),
            ArityKind::Unary => WrappedHandler::unary(
                self.context.clone(),
                InvocationPolicy::Repeatable,
                callable,
            ),
        };
        let id = self.inner.hub().register(event, handler);
        let socket = Arc::clone(&self.inner);
        Registration::new(move || socket.hub().unregister(event, id))
    }

    /// Queue data for the peer
    pub fn write(&self, data: impl Into<String>) {
        self.inner.write(data);
    }

    /// Close the socket
    pub fn close(&self) {
        self.inner.close();
    }

    /// The underlying host resource
    pub fn resource(&self) -> &Arc<NetSocket> {
        &self.inner
    }
}

enum ArityKind {
    Nullary,
    Unary,
}

impl std::fmt::Debug for NetSocketFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetSocketFacade")
            .field("context", &self.context)
            .finish()
    }
}

impl Facade for NetSocketFacade {
    fn facade_kind(&self) -> &'static str {
        "net-socket"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::context::ContextKind;
    use std::sync::mpsc;
    use std::time::Duration;

    fn test_context() -> ContextHandle {
        ContextHandle::spawn("net-facade-test", ContextKind::EventLoop, 128).unwrap()
    }

    #[test]
    fn test_connect_handler_receives_socket_facade() {
        let ctx = test_context();
        let server = NetServerFacade::new(ctx.clone(), None);
        server.listen(7000, None);

        let (tx, rx) = mpsc::channel();
        server.connect_handler(CallableHandle::from_fn1(move |value| {
            let kind = value.as_facade().map(|f| f.kind());
            tx.send(kind).unwrap();
            Ok(())
        }));

        let socket = NetSocket::new(ctx.clone());
        server.resource().deliver_connection(socket);

        let kind = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(kind, Some("net-socket"));
        ctx.close(Duration::from_secs(1));
    }

    #[test]
    fn test_unregister_stops_delivery() {
        let ctx = test_context();
        let server = NetServerFacade::new(ctx.clone(), None);
        server.listen(7000, None);

        let (tx, rx) = mpsc::channel();
        let registration = server.connect_handler(CallableHandle::from_fn1(move |_| {
            tx.send(()).unwrap();
            Ok(())
        }));

        assert!(registration.unregister());
        assert!(!registration.unregister());

        let socket = NetSocket::new(ctx.clone());
        server.resource().deliver_connection(socket);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        ctx.close(Duration::from_secs(1));
    }

    #[test]
    fn test_listen_completion_error_first() {
        let ctx = test_context();
        let server = NetServerFacade::new(ctx.clone(), None);

        let (tx, rx) = mpsc::channel();
        server.listen(
            7000,
            Some(CallableHandle::from_fn2(move |err, result| {
                tx.send((err, result)).unwrap();
                Ok(())
            })),
        );

        let (err, result) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(err.is_null());
        assert!(result.is_null());
        ctx.close(Duration::from_secs(1));
    }

    #[test]
    fn test_client_connect_delivers_socket_facade() {
        let ctx = test_context();
        let server = NetServerFacade::new(ctx.clone(), None);
        server.listen(7100, None);
        server.connect_handler(CallableHandle::from_fn1(|_| Ok(())));

        let client = NetClientFacade::new(ctx.clone(), None);
        client.resource().set_peer(Arc::clone(server.resource()));

        let (tx, rx) = mpsc::channel();
        client.connect(
            7100,
            CallableHandle::from_fn2(move |err, socket| {
                let kind = socket.as_facade().map(|f| f.kind());
                tx.send((err.is_null(), kind)).unwrap();
                Ok(())
            }),
        );

        let (ok, kind) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(ok);
        assert_eq!(kind, Some("net-socket"));
        ctx.close(Duration::from_secs(1));
    }

    #[test]
    fn test_socket_data_and_lifecycle_handlers() {
        let ctx = test_context();
        let socket = NetSocketFacade::from_resource(NetSocket::new(ctx.clone()));

        let (tx, rx) = mpsc::channel();
        let data_tx = tx.clone();
        socket.data_handler(CallableHandle::from_fn1(move |value| {
            data_tx
                .send(format!("data:{}", value.as_str().unwrap_or("?")))
                .unwrap();
            Ok(())
        }));
        let drain_tx = tx.clone();
        socket.drain_handler(CallableHandle::from_fn0(move || {
            drain_tx.send("drain".to_string()).unwrap();
            Ok(())
        }));
        let end_tx = tx.clone();
        socket.end_handler(CallableHandle::from_fn0(move || {
            end_tx.send("end".to_string()).unwrap();
            Ok(())
        }));
        socket.close_handler(CallableHandle::from_fn0(move || {
            tx.send("close".to_string()).unwrap();
            Ok(())
        }));

        socket.write("out");
        socket.resource().deliver_data("in");
        socket.resource().deliver_drain();
        socket.resource().deliver_end();

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            "data:in"
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "drain");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "end");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "close");
        assert_eq!(socket.resource().written(), vec!["out".to_string()]);
        ctx.close(Duration::from_secs(1));
    }
}
