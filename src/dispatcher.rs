//! Routing of inbound notifications to typed reports
//!
//! Every notification is decrypted with the session key, checked and parsed.
//! Reports that change session state (mesh address, group list) are applied
//! first. The report is then handed to the [`ReportHandler`] and broadcast to
//! subscribers. Malformed or unknown notifications are logged and dropped.

use crate::codec::PacketCipher;
use crate::constants::PACKET_SIZE;
use crate::packet::Notification;
use crate::report::{
    AddressReport, DeviceInfoReport, GroupIdReport, OnlineStatusReport, OtaStatusReport, Report, StatusReport,
    TimeReport, parse_report,
};
use crate::session::{self, SessionState, VendorCode};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Reports kept for slow broadcast subscribers before they start lagging
const REPORT_CHANNEL_CAPACITY: usize = 64;

/// Callbacks for decoded reports. Every method defaults to doing nothing.
///
/// Handlers run on the notification task and must not block.
pub trait ReportHandler: Send + Sync {
    fn on_time_report(&self, _report: &TimeReport) {}
    fn on_address_report(&self, _report: &AddressReport) {}
    fn on_device_info_report(&self, _report: &DeviceInfoReport) {}
    fn on_group_id_report(&self, _report: &GroupIdReport) {}
    fn on_online_status_report(&self, _report: &OnlineStatusReport) {}
    fn on_status_report(&self, _report: &StatusReport) {}
    fn on_ota_status_report(&self, _report: &OtaStatusReport) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl ReportHandler for NoopHandler {}

/// A decrypted notification is usable if it is packet-sized, carries our
/// vendor code and a known command code
pub fn check_packet_validity(packet: &[u8], vendor: VendorCode) -> bool {
    match Notification::parse(packet) {
        Ok(notification) => notification.vendor == vendor.0 && notification.command().is_some(),
        Err(_) => false,
    }
}

/// Decrypts notifications and dispatches the reports they carry.
#[derive(Clone)]
pub struct CommandDispatcher {
    session: Arc<Mutex<SessionState>>,
    cipher: Arc<dyn PacketCipher>,
    handler: Arc<dyn ReportHandler>,
    reports: broadcast::Sender<Report>,
}

impl CommandDispatcher {
    pub fn new(
        session: Arc<Mutex<SessionState>>,
        cipher: Arc<dyn PacketCipher>,
        handler: Arc<dyn ReportHandler>,
    ) -> Self {
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            session,
            cipher,
            handler,
            reports,
        }
    }

    /// Receive every report dispatched from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Report> {
        self.reports.subscribe()
    }

    /// Handle one raw (still encrypted) notification value.
    ///
    /// Returns the report it carried, or `None` if it was dropped.
    pub fn on_notification(&self, raw: &[u8]) -> Option<Report> {
        trace!(raw = %hex::encode(raw), "Notification received");
        if raw.len() != PACKET_SIZE {
            warn!(len = raw.len(), "Dropping notification with bad length");
            return None;
        }

        let (plaintext, vendor) = {
            let state = session::lock(&self.session);
            let plaintext = match state.decrypt_notification(self.cipher.as_ref(), raw) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    warn!("Dropping notification: {e}");
                    return None;
                }
            };
            (plaintext, state.vendor())
        };

        if !check_packet_validity(&plaintext, vendor) {
            warn!(plaintext = %hex::encode(plaintext), "Dropping invalid notification");
            return None;
        }
        self.dispatch(&plaintext)
    }

    /// Dispatch an already decrypted notification
    pub fn dispatch(&self, plaintext: &[u8]) -> Option<Report> {
        let notification = match Notification::parse(plaintext) {
            Ok(notification) => notification,
            Err(e) => {
                warn!("Dropping notification: {e}");
                return None;
            }
        };

        let Some(report) = parse_report(&notification) else {
            match notification.command() {
                Some(command) => debug!(%command, "Ignoring non-report notification"),
                None => trace!("Ignoring unknown command code {:#04x}", notification.command),
            }
            return None;
        };
        debug!(command = %report.command(), source = report.source(), "Report received");

        self.apply(&report);
        self.notify(&report);
        Some(report)
    }

    /// Session state only follows reports from the connected node itself.
    ///
    /// Other mesh nodes relay their reports through it, and a report
    /// finishing after `disconnect` must not touch the ended session.
    fn apply(&self, report: &Report) {
        let mut state = session::lock(&self.session);
        if !state.has_key() {
            debug!(command = %report.command(), "Session ended, not applying report");
            return;
        }

        let source = report.source();
        let own = source == 0 || source == state.mesh_id();
        match report {
            Report::Address(r) if own => state.set_reported_mesh_id(r.mesh_id),
            Report::GroupId(r) if own => state.replace_groups(r.groups.iter().copied()),
            Report::Address(_) | Report::GroupId(_) => {
                debug!(source, mesh_id = state.mesh_id(), "Report relayed from another node")
            }
            _ => {}
        }
        state.settle(report.command());
    }

    fn notify(&self, report: &Report) {
        match report {
            Report::Time(r) => self.handler.on_time_report(r),
            Report::Address(r) => self.handler.on_address_report(r),
            Report::DeviceInfo(r) => self.handler.on_device_info_report(r),
            Report::GroupId(r) => self.handler.on_group_id_report(r),
            Report::OnlineStatus(r) => self.handler.on_online_status_report(r),
            Report::Status(r) => self.handler.on_status_report(r),
            Report::OtaStatus(r) => self.handler.on_ota_status_report(r),
        }
        // No subscribers is fine
        let _ = self.reports.send(report.clone());
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("subscribers", &self.reports.receiver_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TelinkCipher;
    use crate::constants::{Command, TELINK_VENDOR};
    use crate::identity::DeviceIdentity;
    use crate::session::DispatchState;

    fn dispatcher() -> (CommandDispatcher, Arc<Mutex<SessionState>>) {
        let identity = DeviceIdentity::parse("A4:C1:38:00:11:22", "dev", "pass1234").unwrap();
        let mut state = SessionState::new(identity, VendorCode::default());
        state.derive_shared_key(&[0; 8], &[1; 8]);
        let session = Arc::new(Mutex::new(state));
        let dispatcher = CommandDispatcher::new(session.clone(), Arc::new(TelinkCipher), Arc::new(NoopHandler));
        (dispatcher, session)
    }

    fn plaintext(command: u8, vendor: u16, data: [u8; 10]) -> [u8; PACKET_SIZE] {
        from_source(0, command, vendor, data)
    }

    fn from_source(source: u16, command: u8, vendor: u16, data: [u8; 10]) -> [u8; PACKET_SIZE] {
        Notification {
            sequence: 1,
            source,
            command,
            vendor,
            data,
        }
        .to_bytes()
    }

    #[test]
    fn test_validity() {
        assert!(check_packet_validity(&plaintext(0xE1, TELINK_VENDOR, [0; 10]), VendorCode::default()));
        assert!(!check_packet_validity(&plaintext(0xE1, 0x1234, [0; 10]), VendorCode::default()));
        assert!(!check_packet_validity(&plaintext(0x42, TELINK_VENDOR, [0; 10]), VendorCode::default()));
        assert!(!check_packet_validity(&[0u8; 19], VendorCode::default()));
    }

    #[test]
    fn test_address_report_updates_session() {
        let (dispatcher, session) = dispatcher();
        session::lock(&session).await_report(Command::AddressReport);

        let report = dispatcher.dispatch(&plaintext(0xE1, TELINK_VENDOR, [0x0C, 0, 0, 0, 0, 0, 0, 0, 0, 0]));
        assert!(matches!(report, Some(Report::Address(AddressReport { mesh_id: 12, .. }))));

        let state = session::lock(&session);
        assert_eq!(state.mesh_id(), 12);
        assert_eq!(state.dispatch_state(), DispatchState::Idle);
    }

    #[test]
    fn test_unknown_command_is_dropped() {
        let (dispatcher, session) = dispatcher();
        assert!(dispatcher.dispatch(&plaintext(0x42, TELINK_VENDOR, [0; 10])).is_none());
        assert_eq!(session::lock(&session).mesh_id(), 0);
    }

    #[test]
    fn test_relayed_reports_leave_session_alone() {
        let (dispatcher, session) = dispatcher();
        dispatcher.dispatch(&from_source(0, 0xE1, TELINK_VENDOR, [7, 0, 0, 0, 0, 0, 0, 0, 0, 0]));
        assert_eq!(session::lock(&session).mesh_id(), 7);

        let relayed = dispatcher.dispatch(&from_source(9, 0xE1, TELINK_VENDOR, [9, 0, 0, 0, 0, 0, 0, 0, 0, 0]));
        assert!(matches!(relayed, Some(Report::Address(AddressReport { source: 9, mesh_id: 9, .. }))));
        assert_eq!(session::lock(&session).mesh_id(), 7);

        let groups = [4, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        dispatcher.dispatch(&from_source(9, 0xD4, TELINK_VENDOR, groups));
        assert!(session::lock(&session).groups().is_empty());
        dispatcher.dispatch(&from_source(7, 0xD4, TELINK_VENDOR, groups));
        assert_eq!(session::lock(&session).groups().iter().copied().collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn test_ended_session_is_not_updated() {
        let (dispatcher, session) = dispatcher();
        let mut reports = dispatcher.subscribe();
        session::lock(&session).end();

        let report = dispatcher.dispatch(&plaintext(0xE1, TELINK_VENDOR, [0x0C, 0, 0, 0, 0, 0, 0, 0, 0, 0]));
        assert!(report.is_some());
        assert_eq!(session::lock(&session).mesh_id(), 0);
        assert!(reports.try_recv().is_ok());
    }

    #[test]
    fn test_without_key_nothing_is_dispatched() {
        let (dispatcher, session) = dispatcher();
        session::lock(&session).end();
        assert!(dispatcher.on_notification(&[0u8; PACKET_SIZE]).is_none());
    }
}
