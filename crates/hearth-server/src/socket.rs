//! Local control-plane transport
//!
//! A Unix domain socket on POSIX and a named pipe on Windows. The server
//! side hands axum a [`Listener`](axum::serve::Listener); the client side
//! gets a plain byte stream to run HTTP/1 over.

#[cfg(unix)]
pub use self::unix::{bind, cleanup, connect, Stream};

#[cfg(windows)]
pub use self::windows::{bind, cleanup, connect, Stream};

#[cfg(unix)]
mod unix {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use anyhow::{bail, Context, Result};
    use tokio::net::{UnixListener, UnixStream};

    pub type Stream = UnixStream;

    /// Bind the socket, replacing a stale file left by a dead server.
    /// The socket is only accessible by the current user.
    pub fn bind(address: &str) -> Result<UnixListener> {
        let path = Path::new(address);
        if path.exists() {
            if std::os::unix::net::UnixStream::connect(path).is_ok() {
                bail!("a server is already listening on {}", address);
            }
            tracing::debug!("Removing stale socket {}", address);
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale socket {}", address))?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener =
            UnixListener::bind(path).with_context(|| format!("Failed to bind {}", address))?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        Ok(listener)
    }

    pub async fn connect(address: &str) -> std::io::Result<Stream> {
        UnixStream::connect(address).await
    }

    pub fn cleanup(address: &str) {
        if let Err(e) = std::fs::remove_file(address) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove socket {}: {}", address, e);
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::time::Duration;

    use anyhow::{Context, Result};
    use axum::serve::Listener;
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    pub type Stream = NamedPipeClient;

    const ERROR_PIPE_BUSY: i32 = 231;

    /// Accepts connections by handing out the connected pipe instance and
    /// creating the next one in its place.
    pub struct PipeListener {
        name: String,
        next: NamedPipeServer,
    }

    impl Listener for PipeListener {
        type Io = NamedPipeServer;
        type Addr = String;

        async fn accept(&mut self) -> (Self::Io, Self::Addr) {
            loop {
                if let Err(e) = self.next.connect().await {
                    tracing::warn!("Pipe accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
                match ServerOptions::new().create(&self.name) {
                    Ok(fresh) => {
                        let connected = std::mem::replace(&mut self.next, fresh);
                        return (connected, self.name.clone());
                    }
                    Err(e) => {
                        tracing::error!("Failed to create pipe instance: {}", e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        }

        fn local_addr(&self) -> std::io::Result<Self::Addr> {
            Ok(self.name.clone())
        }
    }

    pub fn bind(address: &str) -> Result<PipeListener> {
        let next = ServerOptions::new()
            .first_pipe_instance(true)
            .create(address)
            .with_context(|| format!("Failed to create pipe {}", address))?;
        Ok(PipeListener {
            name: address.to_string(),
            next,
        })
    }

    pub async fn connect(address: &str) -> std::io::Result<Stream> {
        loop {
            match ClientOptions::new().open(address) {
                Ok(client) => return Ok(client),
                Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn cleanup(_address: &str) {}
}
