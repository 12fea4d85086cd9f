// EnOcean BLE Core: telegram gateway
//
// Receives raw BLE advertisements from EnOcean devices, authenticates them
// against commissioned keys and hands decoded telegrams to the application.
// The Bluetooth stack itself lives behind `gateway::RadioCollaborator`.

pub mod commissioning;
pub mod device;
pub mod discovery;
pub mod gateway;
pub mod security;
pub mod store;
pub mod telegram;

pub use commissioning::{
    CommissionOutcome, CommissioningData, CommissioningError, CommissioningRecord,
    CommissioningStore,
};
pub use device::{DeviceId, SecurityKey, SECURITY_KEY_LEN};
pub use discovery::{parse_advertisement, EnOceanAdvertisement, ScanConfig};
pub use gateway::{
    ErrorObserver, FrameSink, Gateway, GatewayError, GatewayOptions, GatewayState, GatewayStats,
    LifecycleError, RadioCollaborator, RadioError, TelegramObserver,
};
pub use security::SecurityError;
pub use store::{MemoryStorage, SledStorage, StorageBackend, StorageError};
pub use telegram::{
    DecodeError, DecodePolicy, DeviceModel, FrameBuilder, FrameMetadata, Telegram,
    WallSwitchState,
};
