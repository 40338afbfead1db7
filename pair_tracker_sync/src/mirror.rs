use std::path::PathBuf;

use pair_tracker_lib::settings::UserSettings;

use crate::MIRROR_FILE;

/// Local copy of the last settings the backend acknowledged. Read once at
/// startup to decide whether tracking should come back before the network
/// does.
///
/// The mirror is advisory: write failures are logged and swallowed, and a
/// corrupt file counts as no mirror at all.
#[derive(Clone)]
pub struct SettingsMirror {
    path: PathBuf,
}

impl SettingsMirror {
    pub fn open_default() -> Self {
        let root: PathBuf = project_root::get_project_root().unwrap();
        Self {
            path: root.join(MIRROR_FILE),
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Settings from the last acknowledged write, if a readable mirror
    /// exists.
    pub async fn load(&self) -> Option<UserSettings> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!("Failed to read settings mirror: {}", err);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(settings) => Some(settings),
            Err(err) => {
                tracing::warn!("Settings mirror is corrupt, ignoring it: {}", err);
                None
            }
        }
    }

    /// Record settings the backend has acknowledged. Mirror failures never
    /// fail the operation that triggered the write.
    pub async fn store(&self, settings: UserSettings) {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                if let Err(err) = tokio::fs::create_dir_all(parent).await {
                    tracing::warn!("Failed to create mirror directory: {}", err);
                    return;
                }
            }
        }

        let Ok(bytes) = serde_json::to_vec_pretty(&settings) else {
            tracing::warn!("Failed to encode settings mirror");
            return;
        };

        if let Err(err) = tokio::fs::write(&self.path, bytes).await {
            tracing::warn!("Failed to write settings mirror: {}", err);
        }
    }
}

#[tokio::test]
async fn mirror_round_trips_settings() {
    let mirror = SettingsMirror::open(crate::testing::temp_mirror_path("round_trip"));
    assert_eq!(mirror.load().await, None);

    let settings = UserSettings::new(true, false);
    mirror.store(settings).await;
    assert_eq!(mirror.load().await, Some(settings));

    let settings = UserSettings::new(false, true);
    mirror.store(settings).await;
    assert_eq!(mirror.load().await, Some(settings));
}

#[tokio::test]
async fn corrupt_mirror_is_ignored() {
    let path = crate::testing::temp_mirror_path("corrupt");
    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&path, b"not json {").await.unwrap();

    let mirror = SettingsMirror::open(path);
    assert_eq!(mirror.load().await, None);
}

#[tokio::test]
async fn store_failures_do_not_surface() {
    // The parent of the mirror path is a file, so the directory can never be
    // created and the write must fail.
    let blocker = crate::testing::temp_mirror_path("blocked");
    tokio::fs::create_dir_all(blocker.parent().unwrap()).await.unwrap();
    tokio::fs::write(&blocker, b"").await.unwrap();

    let mirror = SettingsMirror::open(blocker.join("mirror.json"));
    mirror.store(UserSettings::new(true, true)).await;
    assert_eq!(mirror.load().await, None);
}
