//! Typed reports carried by device notifications
//!
//! Each parser reads the 10 data bytes that follow the notification header
//! (packet bytes 10-19). Offsets below are relative to that data block.

use crate::constants::Command;
use crate::packet::Notification;
use chrono::{NaiveDate, NaiveDateTime};

/// Group slots that hold this value are empty
const EMPTY_GROUP_SLOT: u8 = 0xFF;

/// Device clock, as reported by a time report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeReport {
    pub source: u16,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl TimeReport {
    /// `None` when the device clock holds an impossible date
    pub fn datetime(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year.into(), self.month.into(), self.day.into())?.and_hms_opt(
            self.hour.into(),
            self.minute.into(),
            self.second.into(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressReport {
    pub source: u16,
    pub mesh_id: u16,
}

/// Payload of a device-info report, selected by the last packet byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceInfo {
    /// Kind 0: raw device information block
    Info([u8; 9]),
    /// Kind 2: firmware version string
    Version(String),
    Other { kind: u8, data: [u8; 9] },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfoReport {
    pub source: u16,
    pub info: DeviceInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupIdReport {
    pub source: u16,
    pub groups: Vec<u8>,
}

/// Periodic presence beacon of a mesh node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnlineStatusReport {
    pub source: u16,
    pub mesh_id: u8,
    pub brightness: u8,
    pub flags: u8,
}

impl OnlineStatusReport {
    pub fn is_on(&self) -> bool {
        self.brightness > 0
    }
}

/// Light state answer to a status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub source: u16,
    pub brightness: u8,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub white: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaStatusReport {
    pub source: u16,
    pub data: [u8; 10],
}

/// Any report the dispatcher understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    Time(TimeReport),
    Address(AddressReport),
    DeviceInfo(DeviceInfoReport),
    GroupId(GroupIdReport),
    OnlineStatus(OnlineStatusReport),
    Status(StatusReport),
    OtaStatus(OtaStatusReport),
}

impl Report {
    /// Command code the report arrived with
    pub fn command(&self) -> Command {
        match self {
            Report::Time(_) => Command::TimeReport,
            Report::Address(_) => Command::AddressReport,
            Report::DeviceInfo(_) => Command::DeviceInfoReport,
            Report::GroupId(_) => Command::GroupIdReport,
            Report::OnlineStatus(_) => Command::OnlineStatusReport,
            Report::Status(_) => Command::StatusReport,
            Report::OtaStatus(_) => Command::OtaStatusReport,
        }
    }

    pub fn source(&self) -> u16 {
        match self {
            Report::Time(r) => r.source,
            Report::Address(r) => r.source,
            Report::DeviceInfo(r) => r.source,
            Report::GroupId(r) => r.source,
            Report::OnlineStatus(r) => r.source,
            Report::Status(r) => r.source,
            Report::OtaStatus(r) => r.source,
        }
    }
}

pub fn parse_time_report(notification: &Notification) -> TimeReport {
    let d = &notification.data;
    TimeReport {
        source: notification.source,
        year: u16::from_le_bytes([d[0], d[1]]),
        month: d[2],
        day: d[3],
        hour: d[4],
        minute: d[5],
        second: d[6],
    }
}

pub fn parse_address_report(notification: &Notification) -> AddressReport {
    let d = &notification.data;
    AddressReport {
        source: notification.source,
        mesh_id: u16::from_le_bytes([d[0], d[1]]),
    }
}

pub fn parse_device_info_report(notification: &Notification) -> DeviceInfoReport {
    let d = &notification.data;
    let mut data = [0u8; 9];
    data.copy_from_slice(&d[..9]);
    let info = match d[9] {
        0 => DeviceInfo::Info(data),
        2 => {
            let len = data.iter().position(|&b| b == 0).unwrap_or(data.len());
            DeviceInfo::Version(String::from_utf8_lossy(&data[..len]).trim().to_string())
        }
        kind => DeviceInfo::Other { kind, data },
    };
    DeviceInfoReport {
        source: notification.source,
        info,
    }
}

pub fn parse_group_id_report(notification: &Notification) -> GroupIdReport {
    GroupIdReport {
        source: notification.source,
        groups: notification
            .data
            .iter()
            .copied()
            .filter(|&g| g != EMPTY_GROUP_SLOT)
            .collect(),
    }
}

pub fn parse_online_status_report(notification: &Notification) -> OnlineStatusReport {
    let d = &notification.data;
    OnlineStatusReport {
        source: notification.source,
        mesh_id: d[0],
        brightness: d[2],
        flags: d[3],
    }
}

pub fn parse_status_report(notification: &Notification) -> StatusReport {
    let d = &notification.data;
    StatusReport {
        source: notification.source,
        brightness: d[0],
        red: d[1],
        green: d[2],
        blue: d[3],
        white: d[5],
    }
}

pub fn parse_ota_status_report(notification: &Notification) -> OtaStatusReport {
    OtaStatusReport {
        source: notification.source,
        data: notification.data,
    }
}

/// Parse a notification into a typed report. `None` for codes that are not reports.
pub fn parse_report(notification: &Notification) -> Option<Report> {
    let report = match notification.command()? {
        Command::TimeReport => Report::Time(parse_time_report(notification)),
        Command::AddressReport => Report::Address(parse_address_report(notification)),
        Command::DeviceInfoReport => Report::DeviceInfo(parse_device_info_report(notification)),
        Command::GroupIdReport => Report::GroupId(parse_group_id_report(notification)),
        Command::OnlineStatusReport => Report::OnlineStatus(parse_online_status_report(notification)),
        Command::StatusReport => Report::Status(parse_status_report(notification)),
        Command::OtaStatusReport => Report::OtaStatus(parse_ota_status_report(notification)),
        _ => return None,
    };
    Some(report)
}
