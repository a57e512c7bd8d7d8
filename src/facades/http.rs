//! HTTP server/client and SockJS façades.

use crate::facades::net::socket_converter;
use crate::facades::Registration;
use crate::handler::{CallableHandle, InvocationPolicy, WrappedHandler};
use crate::host::context::ContextHandle;
use crate::host::resources::{events, HttpClient, HttpServer};
use crate::value::{ConfigTree, Facade};
use std::any::Any;
use std::sync::Arc;

/// Scripting façade over a host HTTP server
pub struct HttpServerFacade {
    inner: Arc<HttpServer>,
    context: ContextHandle,
    options: Option<ConfigTree>,
}

impl HttpServerFacade {
    /// Create an HTTP server owned by the given context, with
    /// already-marshalled creation options
    pub fn new(context: ContextHandle, options: Option<ConfigTree>) -> Self {
        Self {
            inner: HttpServer::new(context.clone()),
            context,
            options,
        }
    }

    /// Options supplied at creation, if any
    pub fn options(&self) -> Option<&ConfigTree> {
        self.options.as_ref()
    }

    /// Register a repeatable request handler; the handler receives the
    /// request description as a map value.
    pub fn request_handler(&self, callable: CallableHandle) -> Registration {
        let handler = WrappedHandler::unary(
            self.context.clone(),
            InvocationPolicy::Repeatable,
            callable,
        );
        let id = self.inner.hub().register(events::REQUEST, handler);
        let server = Arc::clone(&self.inner);
        Registration::new(move || server.hub().unregister(events::REQUEST, id))
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
    pub fn resource(&self) -> &Arc<HttpServer> {
        &self.inner
    }
}

impl std::fmt::Debug for HttpServerFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServerFacade")
            .field("options", &self.options)
            .finish()
    }
}

impl Facade for HttpServerFacade {
    fn facade_kind(&self) -> &'static str {
        "http-server"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Scripting façade over a host HTTP client
pub struct HttpClientFacade {
    inner: Arc<HttpClient>,
    options: Option<ConfigTree>,
}

impl HttpClientFacade {
    /// Create an HTTP client owned by the given context, with
    /// already-marshalled creation options
    pub fn new(context: ContextHandle, options: Option<ConfigTree>) -> Self {
        Self {
            inner: HttpClient::new(context),
            options,
        }
    }

    /// Options supplied at creation, if any
    pub fn options(&self) -> Option<&ConfigTree> {
        self.options.as_ref()
    }

    /// Close the client
    pub fn close(&self) {
        self.inner.close();
    }

    /// The underlying host resource
    pub fn resource(&self) -> &Arc<HttpClient> {
        &self.inner
    }
}

impl std::fmt::Debug for HttpClientFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClientFacade")
            .field("options", &self.options)
            .finish()
    }
}

impl Facade for HttpClientFacade {
    fn facade_kind(&self) -> &'static str {
        "http-client"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Scripting façade over the SockJS bridge of an HTTP server.
///
/// SockJS sockets ride on an existing HTTP server; the façade registers
/// against that server's socket slot and presents each opened socket as a
/// socket façade.
pub struct SockJsServerFacade {
    server: Arc<HttpServer>,
    context: ContextHandle,
}

impl SockJsServerFacade {
    /// Bridge SockJS onto an existing HTTP server
    pub fn new(http_server: &HttpServerFacade) -> Self {
        Self {
            server: Arc::clone(http_server.resource()),
            context: http_server.context.clone(),
        }
    }

    /// Register a repeatable socket handler; the handler receives a socket
    /// façade per opened SockJS session.
    pub fn socket_handler(&self, callable: CallableHandle) -> Registration {
        let handler = WrappedHandler::unary_converted(
            self.context.clone(),
            InvocationPolicy::Repeatable,
            callable,
            socket_converter(),
        );
        let id = self.server.hub().register(events::SOCKJS_SOCKET, handler);
        let server = Arc::clone(&self.server);
        Registration::new(move || server.hub().unregister(events::SOCKJS_SOCKET, id))
    }
}

impl std::fmt::Debug for SockJsServerFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SockJsServerFacade")
            .field("context", &self.context)
            .finish()
    }
}

impl Facade for SockJsServerFacade {
    fn facade_kind(&self) -> &'static str {
        "sockjs-server"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::context::ContextKind;
    use crate::host::resources::NetSocket;
    use crate::value::ConfigTree;
    use std::sync::mpsc;
    use std::time::Duration;

    fn test_context() -> ContextHandle {
        ContextHandle::spawn("http-facade-test", ContextKind::EventLoop, 128).unwrap()
    }

    #[test]
    fn test_request_handler_receives_map() {
        let ctx = test_context();
        let server = HttpServerFacade::new(ctx.clone(), None);
        server.listen(8080, None);

        let (tx, rx) = mpsc::channel();
        server.request_handler(CallableHandle::from_fn1(move |request| {
            let method = request
                .get("method")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            tx.send(method).unwrap();
            Ok(())
        }));

        server.resource().deliver_request(ConfigTree::Object(
            [("method".to_string(), ConfigTree::String("POST".into()))].into(),
        ));

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Some("POST".to_string())
        );
        ctx.close(Duration::from_secs(1));
    }

    #[test]
    fn test_close_releases_request_handlers() {
        let ctx = test_context();
        let server = HttpServerFacade::new(ctx.clone(), None);
        server.listen(8080, None);

        let (tx, rx) = mpsc::channel();
        server.request_handler(CallableHandle::from_fn1(move |_| {
            tx.send(()).unwrap();
            Ok(())
        }));
        server.close();

        server
            .resource()
            .deliver_request(ConfigTree::empty_object());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        ctx.close(Duration::from_secs(1));
    }

    #[test]
    fn test_sockjs_socket_handler_receives_socket_facade() {
        let ctx = test_context();
        let http = HttpServerFacade::new(ctx.clone(), None);
        http.listen(8080, None);
        let sockjs = SockJsServerFacade::new(&http);

        let (tx, rx) = mpsc::channel();
        sockjs.socket_handler(CallableHandle::from_fn1(move |value| {
            tx.send(value.as_facade().map(|f| f.kind())).unwrap();
            Ok(())
        }));

        http.resource()
            .deliver_sockjs_socket(NetSocket::new(ctx.clone()));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Some("net-socket")
        );
        ctx.close(Duration::from_secs(1));
    }

    #[test]
    fn test_http_client_close() {
        let ctx = test_context();
        let client = HttpClientFacade::new(ctx.clone(), None);
        assert!(!client.resource().is_closed());
        client.close();
        assert!(client.resource().is_closed());
        ctx.close(Duration::from_secs(1));
    }
}
