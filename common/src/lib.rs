pub mod codec;
pub mod config;
pub mod connectivity;
pub mod domain;
pub mod error;
pub mod schedule;
pub mod session;
pub mod setpoints;
pub mod sync;
pub mod tag;

pub use codec::{
    decode_schedule, decode_setpoints, encode_schedule, encode_setpoints, is_fresh, CommandReply,
    CommandRequest, DeviceReadout, Packet,
};
pub use config::{
    ClientConfig, ConnectivityConfig, HistoryConfig, LinkConfig, ReconcileMode, SyncConfig,
};
pub use connectivity::{
    normalize_ssid, ConnectivityAction, ConnectivityEvent, ConnectivityMachine, ConnectivityPhase,
    ConnectivityState, ConnectivityTimer, SsidCheck,
};
pub use domain::{ConfigDomain, ScheduleDomain, SetpointEdit, SetpointsDomain};
pub use error::{ConnectivityError, EditError, PacketEncodingError, SyncError, TagParseError};
pub use schedule::{Schedule, ScheduleEdit, ScheduleSlot, SlotField};
pub use session::{ConfigKind, FieldChange, SyncSession, SyncStatus};
pub use setpoints::{SetpointKey, Setpoints};
pub use sync::{SyncAction, SyncEvent, SyncMachine, SyncOutcome, SyncPhase, SyncSnapshot, SyncTimer};
pub use tag::{decode_tag_response, parse_tag, ZoneConfig};
