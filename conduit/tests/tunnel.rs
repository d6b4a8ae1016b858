#[cfg(test)]
mod tests {
    use conduit::{Error, HostPort, ProxyBuilder, Reactor, ReactorHandle, Resolve, Result};

    use std::io::{ErrorKind, Read, Write};
    use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
    use std::sync::Arc;
    use std::sync::mpsc::channel;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    const ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

    /// A proxy running on its own thread, stopped on drop.
    struct Proxy {
        addr: SocketAddr,
        handle: ReactorHandle,
        thread: Option<JoinHandle<()>>,
    }

    impl Proxy {
        fn spawn(builder: ProxyBuilder) -> Self {
            Self::spawn_with(builder, None)
        }

        fn spawn_with(builder: ProxyBuilder, resolver: Option<Arc<dyn Resolve>>) -> Self {
            let config = builder
                .listen_addr("127.0.0.1:0".parse().unwrap())
                .build()
                .expect("Failed to build config");

            let (sender, receiver) = channel();

            let thread = thread::spawn(move || {
                let mut reactor = match resolver {
                    Some(resolver) => Reactor::with_resolver(config, resolver),
                    None => Reactor::new(config),
                }
                .expect("Failed to start reactor");

                let addr = reactor.local_addr().expect("Failed to get local address");
                sender.send((addr, reactor.handle())).unwrap();
                reactor.run().expect("Reactor failed");
            });

            let (addr, handle) = receiver.recv().expect("Reactor thread died");

            Self {
                addr,
                handle,
                thread: Some(thread),
            }
        }

        fn client(&self) -> TcpStream {
            let stream = TcpStream::connect(self.addr).expect("Failed to connect to proxy");
            stream
                .set_read_timeout(Some(Duration::from_secs(10)))
                .unwrap();
            stream
        }

        /// Connects and completes a CONNECT to `target`.
        fn tunnel(&self, target: SocketAddr) -> TcpStream {
            let mut client = self.client();
            client
                .write_all(format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n").as_bytes())
                .expect("Failed to write request");

            let mut response = [0; ESTABLISHED.len()];
            client
                .read_exact(&mut response)
                .expect("Failed to read response");
            assert_eq!(&response[..], ESTABLISHED);

            client
        }
    }

    impl Drop for Proxy {
        fn drop(&mut self) {
            self.handle.shutdown();
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }

    /// Echoes every accepted connection back to itself.
    fn echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else {
                    return;
                };

                thread::spawn(move || {
                    let mut buffer = [0; 8192];
                    loop {
                        match stream.read(&mut buffer) {
                            Ok(0) | Err(_) => return,
                            Ok(n) => {
                                if stream.write_all(&buffer[..n]).is_err() {
                                    return;
                                }
                            }
                        }
                    }
                });
            }
        });

        addr
    }

    fn closed_port() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    /// Reads until the proxy closes the connection.
    fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
        let mut received = Vec::new();

        loop {
            let mut buffer = [0; 1024];
            match stream.read(&mut buffer) {
                Ok(0) => return received,
                Ok(n) => received.extend_from_slice(&buffer[..n]),
                Err(err) if err.kind() == ErrorKind::ConnectionReset => return received,
                Err(err) => panic!("connection was not closed: {err}"),
            }
        }
    }

    #[test]
    fn test_connect_then_echo() {
        let echo = echo_server();
        let proxy = Proxy::spawn(ProxyBuilder::new());

        let mut client = proxy.tunnel(echo);

        for _ in 0..3 {
            client.write_all(b"ping").unwrap();
            let mut buffer = [0; 4];
            client.read_exact(&mut buffer).unwrap();
            assert_eq!(&buffer, b"ping");
        }
    }

    #[test]
    fn test_non_connect_request_is_closed() {
        let proxy = Proxy::spawn(ProxyBuilder::new());
        let mut client = proxy.client();

        client
            .write_all(b"GET http://example.com/ HTTP/1.1\r\n\r\n")
            .unwrap();

        assert!(read_until_closed(&mut client).is_empty());
    }

    #[test]
    fn test_bad_request_answered_when_enabled() {
        let proxy = Proxy::spawn(ProxyBuilder::new().error_responses(true));
        let mut client = proxy.client();

        client.write_all(b"CONNECT example.com HTTP/1.1\r\n\r\n").unwrap();

        assert_eq!(
            read_until_closed(&mut client),
            b"HTTP/1.1 400 Bad Request\r\n\r\n"
        );
    }

    #[test]
    fn test_unreachable_destination_is_closed() {
        let proxy = Proxy::spawn(ProxyBuilder::new());
        let mut client = proxy.client();

        client
            .write_all(format!("CONNECT {} HTTP/1.1\r\n\r\n", closed_port()).as_bytes())
            .unwrap();

        assert!(read_until_closed(&mut client).is_empty());
    }

    #[test]
    fn test_bad_gateway_answered_when_enabled() {
        let proxy = Proxy::spawn(ProxyBuilder::new().error_responses(true));
        let mut client = proxy.client();

        client
            .write_all(format!("CONNECT {} HTTP/1.1\r\n\r\n", closed_port()).as_bytes())
            .unwrap();

        assert_eq!(
            read_until_closed(&mut client),
            b"HTTP/1.1 502 Bad Gateway\r\n\r\n"
        );
    }

    #[test]
    fn test_destination_close_reaches_client() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let target = listener.local_addr().unwrap();
        let (delivered, wait_delivered) = channel::<()>();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("Failed to accept connection");
            stream.write_all(b"bye").unwrap();
            let _ = wait_delivered.recv();
        });

        let proxy = Proxy::spawn(ProxyBuilder::new());
        let mut client = proxy.tunnel(target);

        let mut buffer = [0; 3];
        client.read_exact(&mut buffer).unwrap();
        assert_eq!(&buffer, b"bye");

        delivered.send(()).unwrap();
        server.join().expect("Thread panicked");

        assert!(read_until_closed(&mut client).is_empty());
    }

    #[test]
    fn test_client_close_reaches_destination() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let target = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("Failed to accept connection");
            stream
                .set_read_timeout(Some(Duration::from_secs(10)))
                .unwrap();
            read_until_closed(&mut stream)
        });

        let proxy = Proxy::spawn(ProxyBuilder::new());
        let mut client = proxy.tunnel(target);
        client.write_all(b"last words").unwrap();
        client.shutdown(Shutdown::Write).unwrap();

        // Read until the proxy closes our side too.
        read_until_closed(&mut client);

        let received = server.join().expect("Thread panicked");
        assert!(b"last words".starts_with(&received));
    }

    #[test]
    fn test_large_transfer_both_directions() {
        let echo = echo_server();
        let proxy = Proxy::spawn(ProxyBuilder::new());
        let mut client = proxy.tunnel(echo);

        let payload: Vec<u8> = (0..1 << 20).map(|i: u32| (i % 251) as u8).collect();

        let mut writer = client.try_clone().unwrap();
        let sent = payload.clone();
        let sender = thread::spawn(move || writer.write_all(&sent).unwrap());

        let mut received = vec![0; payload.len()];
        client.read_exact(&mut received).unwrap();
        sender.join().expect("Thread panicked");

        assert!(received == payload, "relayed bytes differ");
    }

    #[test]
    fn test_bytes_after_request_head_are_forwarded() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let target = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("Failed to accept connection");
            let mut buffer = [0; 5];
            stream.read_exact(&mut buffer).unwrap();
            buffer
        });

        let proxy = Proxy::spawn(ProxyBuilder::new());
        let mut client = proxy.client();
        client
            .write_all(format!("CONNECT {target} HTTP/1.1\r\n\r\nearly").as_bytes())
            .unwrap();

        let mut response = [0; ESTABLISHED.len()];
        client.read_exact(&mut response).unwrap();
        assert_eq!(&response[..], ESTABLISHED);

        assert_eq!(&server.join().expect("Thread panicked"), b"early");
    }

    #[test]
    fn test_line_feed_only_request_relays_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let target = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("Failed to accept connection");
            stream
                .set_read_timeout(Some(Duration::from_secs(10)))
                .unwrap();
            let mut buffer = [0; 7];
            stream.read_exact(&mut buffer).expect("Payload was not relayed");
            buffer
        });

        let proxy = Proxy::spawn(ProxyBuilder::new());
        let mut client = proxy.client();
        client
            .write_all(format!("CONNECT {target} HTTP/1.1\nHost: {target}\n\n").as_bytes())
            .unwrap();

        let mut response = [0; ESTABLISHED.len()];
        client.read_exact(&mut response).unwrap();
        assert_eq!(&response[..], ESTABLISHED);

        client.write_all(b"payload").unwrap();
        assert_eq!(&server.join().expect("Thread panicked"), b"payload");
    }

    #[test]
    fn test_inline_resolution() {
        let echo = echo_server();
        let proxy = Proxy::spawn(ProxyBuilder::new().resolver_threads(0));

        let mut client = proxy.tunnel(echo);
        client.write_all(b"inline").unwrap();

        let mut buffer = [0; 6];
        client.read_exact(&mut buffer).unwrap();
        assert_eq!(&buffer, b"inline");
    }

    #[test]
    fn test_concurrent_tunnels() {
        let echo = echo_server();
        let proxy = Proxy::spawn(ProxyBuilder::new().resolver_threads(2));

        let mut clients: Vec<TcpStream> = (0..8).map(|_| proxy.tunnel(echo)).collect();

        for (i, client) in clients.iter_mut().enumerate() {
            client.write_all(format!("client-{i}").as_bytes()).unwrap();
        }
        for (i, client) in clients.iter_mut().enumerate() {
            let expected = format!("client-{i}");
            let mut buffer = vec![0; expected.len()];
            client.read_exact(&mut buffer).unwrap();
            assert_eq!(buffer, expected.as_bytes());
        }
    }

    struct Fixed(SocketAddr);

    impl Resolve for Fixed {
        fn resolve(&self, _: &HostPort) -> Result<SocketAddr> {
            Ok(self.0)
        }
    }

    struct Refusing;

    impl Resolve for Refusing {
        fn resolve(&self, target: &HostPort) -> Result<SocketAddr> {
            Err(Error::NoAddress {
                host: target.host.clone(),
                port: target.port,
            })
        }
    }

    struct Panicking;

    impl Resolve for Panicking {
        fn resolve(&self, _: &HostPort) -> Result<SocketAddr> {
            panic!("resolver failure");
        }
    }

    #[test]
    fn test_custom_resolver_picks_destination() {
        let echo = echo_server();
        let proxy = Proxy::spawn_with(ProxyBuilder::new(), Some(Arc::new(Fixed(echo))));
        let mut client = proxy.client();

        client
            .write_all(b"CONNECT service.internal:443 HTTP/1.1\r\n\r\n")
            .unwrap();

        let mut response = [0; ESTABLISHED.len()];
        client.read_exact(&mut response).unwrap();
        assert_eq!(&response[..], ESTABLISHED);

        client.write_all(b"hello").unwrap();
        let mut buffer = [0; 5];
        client.read_exact(&mut buffer).unwrap();
        assert_eq!(&buffer, b"hello");
    }

    #[test]
    fn test_failed_resolution_is_closed() {
        for threads in [0, 2] {
            let proxy = Proxy::spawn_with(
                ProxyBuilder::new().resolver_threads(threads),
                Some(Arc::new(Refusing)),
            );
            let mut client = proxy.client();

            client
                .write_all(b"CONNECT nowhere.invalid:80 HTTP/1.1\r\n\r\n")
                .unwrap();

            assert!(read_until_closed(&mut client).is_empty());
        }
    }

    #[test]
    fn test_panicking_resolver_closes_client_and_keeps_worker() {
        let proxy = Proxy::spawn_with(
            ProxyBuilder::new().resolver_threads(1),
            Some(Arc::new(Panicking)),
        );

        // The second request only gets an answer if the lone worker survived.
        for _ in 0..2 {
            let mut client = proxy.client();
            client
                .write_all(b"CONNECT anywhere.invalid:80 HTTP/1.1\r\n\r\n")
                .unwrap();

            assert!(read_until_closed(&mut client).is_empty());
        }
    }
}
