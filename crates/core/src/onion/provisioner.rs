/// Onion service provisioning
///
/// Two strategies share the same session primitives:
/// - attached: the registration lives as long as the control connection,
///   which is handed back to the caller and kept open
/// - detached: the registration outlives the connection; a stale one from
///   the previous run is removed first and the new one is verified against
///   the daemon's registry before the connection is closed

use super::command::{AddOnion, PortMapping};
use super::identity::ServiceIdentityRecord;
use super::key::{KeyRequest, KeyType, OnionKey};
use super::registry::{DetachedRegistry, VerifyPolicy};
use super::ProvisionError;
use crate::control::{ControlEndpoint, ControlError, Session, Timeouts};
use onionpay_common::ServiceId;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Everything needed to register one onion service
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub endpoint: ControlEndpoint,
    /// Port visitors use on the .onion address
    pub exposed_port: u16,
    /// Local `host:port` the service forwards to
    pub forward_target: String,
    /// Algorithm to ask for when no existing key is given
    pub new_key_type: KeyType,
    pub existing_key: Option<OnionKey>,
    pub existing_service_id: Option<ServiceId>,
    pub detach: bool,
}

impl ProvisionRequest {
    pub fn new(endpoint: ControlEndpoint, exposed_port: u16, forward_target: impl Into<String>) -> Self {
        Self {
            endpoint,
            exposed_port,
            forward_target: forward_target.into(),
            new_key_type: KeyType::Best,
            existing_key: None,
            existing_service_id: None,
            detach: false,
        }
    }

    pub fn with_existing_key(mut self, key: Option<OnionKey>) -> Self {
        self.existing_key = key;
        self
    }

    pub fn with_existing_service_id(mut self, service_id: Option<ServiceId>) -> Self {
        self.existing_service_id = service_id;
        self
    }

    pub fn with_new_key_type(mut self, key_type: KeyType) -> Self {
        self.new_key_type = key_type;
        self
    }

    pub fn detached(mut self, detach: bool) -> Self {
        self.detach = detach;
        self
    }

    pub fn key_request(&self) -> KeyRequest {
        match &self.existing_key {
            Some(key) => KeyRequest::Existing(key.clone()),
            None => KeyRequest::New(self.new_key_type.clone()),
        }
    }

    fn add_onion(&self) -> AddOnion {
        AddOnion::new(
            self.key_request(),
            PortMapping::new(self.exposed_port, self.forward_target.clone()),
        )
        .detached(self.detach)
    }
}

/// Result of a successful provisioning run
#[derive(Debug)]
pub struct Provisioned {
    record: ServiceIdentityRecord,
    /// Open control connection backing an attached service
    session: Option<Session>,
}

impl Provisioned {
    pub fn record(&self) -> &ServiceIdentityRecord {
        &self.record
    }

    pub fn into_record(self) -> ServiceIdentityRecord {
        self.record
    }

    pub fn is_attached(&self) -> bool {
        self.session.is_some()
    }

    /// Resolves when the daemon drops an attached service's connection.
    /// Never resolves for a detached service.
    pub async fn wait_closed(&mut self) -> Result<(), ControlError> {
        match self.session.as_mut() {
            Some(session) => session.wait_closed().await,
            None => std::future::pending().await,
        }
    }

    /// Close the control connection; the daemon removes an attached service
    pub async fn release(self) {
        if let Some(session) = self.session {
            info!("Releasing attached onion {}", self.record.service_id());
            session.close().await;
        }
    }
}

/// Runs provisioning sequences, one at a time
#[derive(Debug, Default)]
pub struct Provisioner {
    timeouts: Timeouts,
    verify: VerifyPolicy,
    in_flight: AtomicBool,
}

impl Provisioner {
    pub fn new(timeouts: Timeouts, verify: VerifyPolicy) -> Self {
        Self {
            timeouts,
            verify,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Register the onion service described by `request`.
    ///
    /// A call made while another run is outstanding fails with
    /// `ProvisionError::InProgress`.
    pub async fn provision(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let _guard = InFlight::acquire(&self.in_flight)?;

        if request.detach {
            let record = self.provision_detached(request).await?;
            Ok(Provisioned {
                record,
                session: None,
            })
        } else {
            self.provision_attached(request).await
        }
    }

    async fn open_session(&self, request: &ProvisionRequest) -> Result<Session, ControlError> {
        let mut session = Session::connect(&request.endpoint, self.timeouts).await?;
        session.authenticate(request.endpoint.secret()).await?;
        Ok(session)
    }

    async fn register(
        &self,
        session: &mut Session,
        request: &ProvisionRequest,
    ) -> Result<ServiceIdentityRecord, ProvisionError> {
        let add = request.add_onion();
        if add.key().is_new() {
            info!("Requesting new onion key ({})", request.new_key_type);
        } else {
            info!("Restoring onion service from saved key");
        }

        let reply = session.send(add.to_command()).await?;
        let record = ServiceIdentityRecord::from_add_onion(&reply, add.key()).map_err(|e| {
            // The daemon holds the service even though the reply is unusable
            match reply.value("ServiceID").and_then(|id| ServiceId::new(id).ok()) {
                Some(service_id) => ProvisionError::Unverified {
                    service_id,
                    source: Box::new(e),
                },
                None => e,
            }
        })?;
        if record.service_id().version() != Some(3) {
            warn!(
                "Daemon returned {} which is not a v3 onion address",
                record.service_id()
            );
        }
        info!(
            "Daemon registered {} ({} -> {})",
            record.onion_host(),
            request.exposed_port,
            request.forward_target
        );
        Ok(record)
    }

    async fn provision_attached(&self, request: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let mut session = self.open_session(request).await?;
        let record = self.register(&mut session, request).await?;

        for keyword in ["onions/current", "onions/detached"] {
            match session.get_info(keyword).await {
                Ok(reply) => debug!("{}: {:?}", keyword, reply.list(keyword)),
                Err(e) => warn!("GETINFO {} failed: {}", keyword, e),
            }
        }

        Ok(Provisioned {
            record,
            session: Some(session),
        })
    }

    async fn provision_detached(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ServiceIdentityRecord, ProvisionError> {
        let mut session = self.open_session(request).await?;

        let before = DetachedRegistry::query(&mut session).await?;
        debug!("{} detached onion(s) before provisioning", before.len());

        if let Some(stale) = &request.existing_service_id {
            self.clear_stale(&mut session, stale).await?;
        }

        let record = self.register(&mut session, request).await?;
        let service_id = record.service_id().clone();

        let (listed, _) = self
            .verify
            .wait_for(&mut session, |registry| registry.contains(&service_id))
            .await
            .map_err(|e| ProvisionError::Unverified {
                service_id: service_id.clone(),
                source: Box::new(ProvisionError::Control(e)),
            })?;

        if !listed {
            warn!(
                "Detached onion {} not listed after {} poll(s); restart the tor daemon",
                service_id, self.verify.attempts
            );
            session.close().await;
            return Err(ProvisionError::NotRegistered { service_id });
        }

        info!("Detached onion {} verified", service_id);
        session.close().await;
        Ok(record)
    }

    /// Remove the previous run's registration. A rejection is expected on
    /// a first run and is not an error.
    async fn clear_stale(
        &self,
        session: &mut Session,
        stale: &ServiceId,
    ) -> Result<(), ControlError> {
        match session.del_onion(stale).await {
            Ok(()) => info!("Removed previous onion {}", stale),
            Err(e) if e.is_rejection() => {
                info!("Could not remove previous onion {} (ok on first run): {}", stale, e);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        // The same key cannot be re-attached until the daemon forgets it
        let (gone, _) = self
            .verify
            .wait_for(session, |registry| !registry.contains(stale))
            .await?;
        if !gone {
            warn!("Previous onion {} still listed, re-registering anyway", stale);
        }
        Ok(())
    }
}

/// Marks a provisioning run as outstanding for its lifetime
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, ProvisionError> {
        if flag.swap(true, Ordering::AcqRel) {
            return Err(ProvisionError::InProgress);
        }
        Ok(Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::testing::FakeDaemon;
    use std::sync::Arc;
    use std::time::Duration;

    const NEW_KEY_REPLY: &str =
        "250-ServiceID=abc123\r\n250-PrivateKey=ED25519-V3:AAAA==\r\n250 OK\r\n";

    fn fast_provisioner() -> Provisioner {
        Provisioner::new(
            Timeouts::default(),
            VerifyPolicy {
                attempts: 3,
                initial_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(4),
            },
        )
    }

    fn detached_listing(ids: &[&str]) -> String {
        let mut reply = String::from("250+onions/detached=\r\n");
        for id in ids {
            reply.push_str(id);
            reply.push_str("\r\n");
        }
        reply.push_str(".\r\n250 OK\r\n");
        reply
    }

    fn request(daemon: &FakeDaemon) -> ProvisionRequest {
        ProvisionRequest::new(daemon.endpoint("hunter2"), 80, "0.0.0.0:7890")
    }

    /// Tracks one detached registration the way tor does
    fn detached_daemon(del_reply: &'static str, keep_listing: bool) -> impl FnMut(&str) -> String {
        let mut registered: Vec<String> = Vec::new();
        move |cmd: &str| {
            if cmd.starts_with("AUTHENTICATE") {
                "250 OK\r\n".into()
            } else if cmd.starts_with("DEL_ONION") {
                del_reply.into()
            } else if cmd.starts_with("ADD_ONION") {
                if keep_listing {
                    registered.push("abc123".into());
                }
                NEW_KEY_REPLY.into()
            } else if cmd == "GETINFO onions/detached" {
                let ids: Vec<&str> = registered.iter().map(String::as_str).collect();
                detached_listing(&ids)
            } else {
                "510 Unrecognized command\r\n".into()
            }
        }
    }

    #[tokio::test]
    async fn attached_registers_and_keeps_connection_open() {
        let daemon = FakeDaemon::spawn(|cmd| {
            if cmd.starts_with("AUTHENTICATE") {
                "250 OK\r\n".into()
            } else if cmd.starts_with("ADD_ONION") {
                NEW_KEY_REPLY.into()
            } else if cmd == "GETINFO onions/current" {
                "250-onions/current=abc123\r\n250 OK\r\n".into()
            } else {
                detached_listing(&[])
            }
        })
        .await;

        let provisioned = fast_provisioner().provision(&request(&daemon)).await.unwrap();
        assert!(provisioned.is_attached());
        assert_eq!(provisioned.record().service_id().as_str(), "abc123");
        assert_eq!(provisioned.record().composite_key(), "ED25519-V3:AAAA==");
        assert_eq!(daemon.open_connections(), 1);

        let commands = daemon.commands().await;
        assert_eq!(commands[1], "ADD_ONION NEW:BEST Port=80,0.0.0.0:7890");
        assert!(commands.contains(&"GETINFO onions/current".to_string()));

        provisioned.release().await;
        assert!(daemon.wait_all_closed().await);
    }

    #[tokio::test]
    async fn restore_sends_saved_key_verbatim() {
        let daemon = FakeDaemon::spawn(|cmd| {
            if cmd.starts_with("ADD_ONION") {
                "250-ServiceID=abc123\r\n250 OK\r\n".into()
            } else {
                "250 OK\r\n".into()
            }
        })
        .await;

        let key = OnionKey::parse("ED25519-V3:AAAA==").unwrap();
        let req = request(&daemon).with_existing_key(Some(key));
        let provisioned = fast_provisioner().provision(&req).await.unwrap();

        let add = daemon
            .commands()
            .await
            .into_iter()
            .find(|c| c.starts_with("ADD_ONION"))
            .unwrap();
        assert_eq!(add, "ADD_ONION ED25519-V3:AAAA== Port=80,0.0.0.0:7890");
        assert!(!add.contains("NEW:"));
        assert_eq!(provisioned.record().composite_key(), "ED25519-V3:AAAA==");
    }

    #[tokio::test]
    async fn bad_password_stops_before_add_onion() {
        let daemon = FakeDaemon::spawn(|_| "515 Bad authentication\r\n".into()).await;

        let err = fast_provisioner()
            .provision(&request(&daemon).detached(true))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::Control(ControlError::Auth { code: 515, .. })
        ));
        let commands = daemon.commands().await;
        assert_eq!(commands.len(), 1);
        assert!(commands.iter().all(|c| !c.starts_with("ADD_ONION")));
    }

    #[tokio::test]
    async fn unreachable_control_port_is_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let req = ProvisionRequest::new(ControlEndpoint::new("127.0.0.1", port, "pw"), 80, "127.0.0.1:1");
        let err = fast_provisioner().provision(&req).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Control(ControlError::Connect { .. })));
    }

    #[tokio::test]
    async fn detached_replaces_stale_registration_and_verifies() {
        let daemon = FakeDaemon::spawn(detached_daemon("250 OK\r\n", true)).await;

        let req = request(&daemon)
            .detached(true)
            .with_existing_service_id(Some(ServiceId::new("old999").unwrap()));
        let provisioned = fast_provisioner().provision(&req).await.unwrap();

        assert!(!provisioned.is_attached());
        assert_eq!(provisioned.record().service_id().as_str(), "abc123");

        let commands = daemon.commands().await;
        let del = commands.iter().position(|c| c == "DEL_ONION old999").unwrap();
        let add = commands
            .iter()
            .position(|c| c == "ADD_ONION NEW:BEST Flags=Detach Port=80,0.0.0.0:7890")
            .unwrap();
        assert!(del < add);
        assert_eq!(commands.last().unwrap(), "GETINFO onions/detached");

        // detached services do not hold the connection
        assert!(daemon.wait_all_closed().await);
    }

    #[tokio::test]
    async fn detached_proceeds_when_nothing_to_delete() {
        let daemon = FakeDaemon::spawn(detached_daemon(
            "552 Unknown Onion Service id\r\n",
            true,
        ))
        .await;

        let req = request(&daemon)
            .detached(true)
            .with_existing_service_id(Some(ServiceId::new("old999").unwrap()));
        let provisioned = fast_provisioner().provision(&req).await.unwrap();

        assert_eq!(provisioned.record().service_id().as_str(), "abc123");
        let commands = daemon.commands().await;
        assert!(commands.iter().any(|c| c.starts_with("ADD_ONION")));
    }

    #[tokio::test]
    async fn detached_fails_when_registry_never_lists_service() {
        let daemon = FakeDaemon::spawn(detached_daemon("250 OK\r\n", false)).await;

        let err = fast_provisioner()
            .provision(&request(&daemon).detached(true))
            .await
            .unwrap_err();

        match &err {
            ProvisionError::NotRegistered { service_id } => {
                assert_eq!(service_id.as_str(), "abc123")
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.unverified_service_id().unwrap().as_str(), "abc123");

        // initial listing + one per verification attempt
        let polls = daemon
            .commands()
            .await
            .iter()
            .filter(|c| *c == "GETINFO onions/detached")
            .count();
        assert_eq!(polls, 1 + 3);
    }

    #[tokio::test]
    async fn failed_verification_poll_keeps_new_service_id() {
        let mut added = false;
        let daemon = FakeDaemon::spawn(move |cmd| {
            if cmd.starts_with("ADD_ONION") {
                added = true;
                NEW_KEY_REPLY.into()
            } else if cmd == "GETINFO onions/detached" && added {
                "551 Internal error\r\n".into()
            } else if cmd == "GETINFO onions/detached" {
                detached_listing(&[])
            } else {
                "250 OK\r\n".into()
            }
        })
        .await;

        let err = fast_provisioner()
            .provision(&request(&daemon).detached(true))
            .await
            .unwrap_err();

        match &err {
            ProvisionError::Unverified { service_id, source } => {
                assert_eq!(service_id.as_str(), "abc123");
                assert!(matches!(**source, ProvisionError::Control(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.unverified_service_id().unwrap().as_str(), "abc123");
    }

    #[tokio::test]
    async fn unusable_add_onion_reply_keeps_service_id() {
        // New key requested but the reply carries no PrivateKey
        let daemon = FakeDaemon::spawn(|cmd| {
            if cmd.starts_with("ADD_ONION") {
                "250-ServiceID=abc123\r\n250 OK\r\n".into()
            } else {
                "250 OK\r\n".into()
            }
        })
        .await;

        let err = fast_provisioner()
            .provision(&request(&daemon))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ProvisionError::Unverified {
                service_id: ServiceId::new("abc123").unwrap(),
                source: Box::new(ProvisionError::MissingPrivateKey),
            }
        );
        assert_eq!(err.unverified_service_id().unwrap().as_str(), "abc123");
    }

    #[tokio::test]
    async fn attached_session_survives_invalid_diagnostic_reply() {
        let daemon = FakeDaemon::spawn(|cmd| {
            if cmd.starts_with("AUTHENTICATE") {
                "250 OK\r\n".into()
            } else if cmd.starts_with("ADD_ONION") {
                NEW_KEY_REPLY.into()
            } else if cmd == "GETINFO onions/current" {
                "250-onions/current=abc123\r\n552 odd\r\n".into()
            } else {
                detached_listing(&[])
            }
        })
        .await;

        let mut provisioned = fast_provisioner().provision(&request(&daemon)).await.unwrap();
        assert!(daemon
            .commands()
            .await
            .contains(&"GETINFO onions/detached".to_string()));

        // The connection is alive, so waiting for it to close must not finish
        let waited =
            tokio::time::timeout(Duration::from_millis(50), provisioned.wait_closed()).await;
        assert!(waited.is_err());
        assert_eq!(daemon.open_connections(), 1);

        provisioned.release().await;
        assert!(daemon.wait_all_closed().await);
    }

    #[tokio::test]
    async fn registers_v3_service_id() {
        const V3_ID: &str = "pg6mmjiyjmcrsslvykfwnntlaru7p5svn6y2ymmju6nubxndf4pscryd";
        let daemon = FakeDaemon::spawn(|cmd| {
            if cmd.starts_with("ADD_ONION") {
                format!("250-ServiceID={V3_ID}\r\n250-PrivateKey=ED25519-V3:AAAA==\r\n250 OK\r\n")
            } else if cmd.starts_with("GETINFO") {
                detached_listing(&[])
            } else {
                "250 OK\r\n".into()
            }
        })
        .await;

        let provisioned = fast_provisioner().provision(&request(&daemon)).await.unwrap();
        assert_eq!(provisioned.record().service_id().as_str(), V3_ID);
        assert_eq!(provisioned.record().service_id().version(), Some(3));
        provisioned.release().await;
    }

    #[tokio::test]
    async fn same_saved_key_yields_same_service_id() {
        let daemon = FakeDaemon::spawn(|cmd| {
            if cmd.starts_with("ADD_ONION ED25519-V3:AAAA==") {
                "250-ServiceID=abc123\r\n250 OK\r\n".into()
            } else if cmd.starts_with("ADD_ONION") {
                "250-ServiceID=zzz000\r\n250-PrivateKey=ED25519-V3:BBBB==\r\n250 OK\r\n".into()
            } else {
                "250 OK\r\n".into()
            }
        })
        .await;

        let provisioner = fast_provisioner();
        let req = request(&daemon)
            .with_existing_key(Some(OnionKey::parse("ED25519-V3:AAAA==").unwrap()));

        let first = provisioner.provision(&req).await.unwrap();
        let first_id = first.record().service_id().clone();
        first.release().await;

        let second = provisioner.provision(&req).await.unwrap();
        assert_eq!(second.record().service_id(), &first_id);
        assert_eq!(daemon.accepted_connections(), 2);
    }

    #[tokio::test]
    async fn concurrent_run_is_rejected() {
        // Accepts connections but never answers, so the first run hangs
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let provisioner = Arc::new(fast_provisioner());
        let req = ProvisionRequest::new(ControlEndpoint::new("127.0.0.1", port, "pw"), 80, "127.0.0.1:1");

        let first = {
            let provisioner = provisioner.clone();
            let req = req.clone();
            tokio::spawn(async move { provisioner.provision(&req).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = provisioner.provision(&req).await.unwrap_err();
        assert!(matches!(err, ProvisionError::InProgress));

        first.abort();
        let _ = first.await;
        drop(listener);
    }
}
