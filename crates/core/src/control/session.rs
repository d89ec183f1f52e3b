use super::codec::{Command, Reply};
use super::endpoint::{ControlEndpoint, Timeouts};
use super::transport::Transport;
use super::ControlError;
use onionpay_common::ServiceId;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Commands the daemon accepts before authentication
const PRE_AUTH_COMMANDS: &[&str] = &["AUTHENTICATE", "PROTOCOLINFO", "AUTHCHALLENGE", "QUIT"];

/// An exclusive, sequential conversation with the control port
#[derive(Debug)]
pub struct Session<S = TcpStream> {
    transport: Transport<S>,
    authenticated: bool,
}

impl Session<TcpStream> {
    pub async fn connect(endpoint: &ControlEndpoint, timeouts: Timeouts) -> Result<Self, ControlError> {
        let transport = Transport::connect(endpoint, timeouts).await?;
        Ok(Self::new(transport))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    pub fn new(transport: Transport<S>) -> Self {
        Self {
            transport,
            authenticated: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Authenticate with the control password
    pub async fn authenticate(&mut self, secret: &str) -> Result<(), ControlError> {
        let command = Command::new("AUTHENTICATE").quoted_secret(secret);
        let reply = self.exchange(&command).await?;

        if !reply.is_ok() {
            warn!("control: authentication rejected ({})", reply.status());
            return Err(ControlError::Auth {
                code: reply.status(),
                raw: reply.raw().to_string(),
            });
        }

        info!("control: authenticated to {}", self.transport.peer());
        self.authenticated = true;
        Ok(())
    }

    /// Send a command and return its successful reply.
    ///
    /// A non-250 reply becomes `ControlError::Command` carrying the raw
    /// reply text.
    pub async fn send(&mut self, command: Command) -> Result<Reply, ControlError> {
        if !self.authenticated && !PRE_AUTH_COMMANDS.contains(&command.name()) {
            return Err(ControlError::NotAuthenticated);
        }

        let reply = self.exchange(&command).await?;
        if !reply.is_ok() {
            debug!("control: {} failed: {}", command.name(), reply.raw());
            return Err(ControlError::Command {
                code: reply.status(),
                raw: reply.raw().to_string(),
            });
        }
        Ok(reply)
    }

    async fn exchange(&mut self, command: &Command) -> Result<Reply, ControlError> {
        let line = command.encode()?;
        debug!("control: -> {}", command);

        self.transport.write_line(&line).await?;
        let reply = self.transport.read_reply().await?;

        debug!("control: <- {} {}", reply.status(), reply.message());
        Ok(reply)
    }

    /// `GETINFO <keyword>`
    pub async fn get_info(&mut self, keyword: &str) -> Result<Reply, ControlError> {
        self.send(Command::new("GETINFO").arg(keyword)).await
    }

    /// `DEL_ONION <serviceId>`
    pub async fn del_onion(&mut self, service_id: &ServiceId) -> Result<(), ControlError> {
        self.send(Command::new("DEL_ONION").arg(service_id.as_str()))
            .await
            .map(|_| ())
    }

    /// Wait until the daemon drops the connection
    pub async fn wait_closed(&mut self) -> Result<(), ControlError> {
        self.transport.wait_closed().await?;
        Ok(())
    }

    pub async fn close(self) {
        self.transport.close().await;
    }
}
