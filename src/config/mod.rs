mod settings;

pub use settings::{
    DatabaseSettings, SCRIPTS_DIR_VAR, SERVICE_VAR, SETTINGS_FILE, Settings, SnapshotSettings,
    SyncSettings,
};
