// Favorite routes and the default route group, kept in device storage.
//
// Older releases stored favorites by route key (a UUID). Favorites are now
// stored by route short name; legacy entries are rewritten on read.

use crate::ct_models::{Result, Route, TransitError};
use crate::ct_storage::{KeyValueStorage, DEFAULT_GROUP_KEY, FAVORITES_KEY};
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

lazy_static! {
    static ref LEGACY_ID: Regex = Regex::new(
        "^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$"
    )
    .expect("legacy identifier pattern is valid");
}

/// Which routes the route list shows by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RouteGroup {
    #[default]
    All,
    Favorites,
}

impl RouteGroup {
    pub fn from_stored(value: i64) -> Self {
        if value == 0 { RouteGroup::All } else { RouteGroup::Favorites }
    }

    pub fn to_stored(self) -> i64 {
        match self {
            RouteGroup::All => 0,
            RouteGroup::Favorites => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub favorites: Vec<String>,
    pub changed: bool,
}

pub fn is_legacy_id(entry: &str) -> bool {
    LEGACY_ID.is_match(entry)
}

/// Rewrite legacy route keys to short names, drop the ones no route claims,
/// and deduplicate keeping the first occurrence.
pub fn migrate_favorites(entries: &[String], routes: &[Route]) -> Migration {
    let mut seen = HashSet::new();
    let mut favorites = Vec::with_capacity(entries.len());
    let mut changed = false;

    for entry in entries {
        let resolved = if is_legacy_id(entry) {
            changed = true;
            match routes.iter().find(|route| &route.key == entry) {
                Some(route) => route.short_name.clone(),
                None => {
                    warn!("Dropping favorite '{}': no route with that key", entry);
                    continue;
                }
            }
        } else {
            entry.clone()
        };

        if seen.insert(resolved.clone()) {
            favorites.push(resolved);
        } else {
            changed = true;
        }
    }

    Migration { favorites, changed }
}

/// Parse the stored favorites value. Entries that are not strings are
/// skipped; a value that is not a JSON array is a read failure.
fn parse_stored(raw: Option<String>) -> Result<Vec<String>> {
    let raw = match raw {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(Vec::new()),
    };

    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| TransitError::StorageError(format!("Invalid favorites value: {}", e)))?;

    match value {
        serde_json::Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) if !s.is_empty() => Some(s),
                other => {
                    warn!("Skipping malformed favorite entry: {}", other);
                    None
                }
            })
            .collect()),
        serde_json::Value::Null => Ok(Vec::new()),
        other => Err(TransitError::StorageError(format!(
            "Favorites value is not a list: {}",
            other
        ))),
    }
}

pub struct FavoritesStore {
    storage: Arc<dyn KeyValueStorage>,
}

impl FavoritesStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        FavoritesStore { storage }
    }

    async fn load(&self) -> Result<Vec<String>> {
        parse_stored(self.storage.get_item(FAVORITES_KEY).await?)
    }

    async fn save(&self, favorites: &[String]) -> Result<()> {
        let json = serde_json::to_string(favorites)
            .map_err(|e| TransitError::StorageError(format!("Failed to serialize favorites: {}", e)))?;
        self.storage.set_item(FAVORITES_KEY, &json).await
    }

    /// Favorited short names, migrated against `routes` and written back
    /// when migration changed anything.
    pub async fn read_favorites(&self, routes: &[Route]) -> Result<Vec<String>> {
        let stored = self.load().await?;
        let migration = migrate_favorites(&stored, routes);

        if migration.changed {
            info!(
                "Migrated favorites: {} stored entries -> {} short names",
                stored.len(),
                migration.favorites.len()
            );
            self.save(&migration.favorites).await?;
        }

        Ok(migration.favorites)
    }

    pub async fn is_favorite(&self, short_name: &str) -> Result<bool> {
        Ok(self.load().await?.iter().any(|f| f == short_name))
    }

    pub async fn add_favorite(&self, short_name: &str) -> Result<()> {
        let mut favorites = self.load().await?;
        if favorites.iter().any(|f| f == short_name) {
            return Ok(());
        }
        favorites.push(short_name.to_string());
        self.save(&favorites).await
    }

    pub async fn remove_favorite(&self, short_name: &str) -> Result<()> {
        let mut favorites = self.load().await?;
        let before = favorites.len();
        favorites.retain(|f| f != short_name);
        if favorites.len() == before {
            return Ok(());
        }
        self.save(&favorites).await
    }

    pub async fn default_group(&self) -> Result<RouteGroup> {
        let raw = match self.storage.get_item(DEFAULT_GROUP_KEY).await? {
            Some(raw) => raw,
            None => return Ok(RouteGroup::All),
        };

        match raw.trim().trim_matches('"').parse::<i64>() {
            Ok(value) => Ok(RouteGroup::from_stored(value)),
            Err(_) => {
                warn!("Ignoring malformed default group '{}'", raw);
                Ok(RouteGroup::All)
            }
        }
    }

    pub async fn set_default_group(&self, group: RouteGroup) -> Result<()> {
        self.storage
            .set_item(DEFAULT_GROUP_KEY, &group.to_stored().to_string())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ct_models::fixtures::route;
    use crate::ct_storage::MemoryStorage;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_legacy_id_shape() {
        assert!(is_legacy_id("A1B2C3D4-0000-0000-0000-000000000000"));
        assert!(is_legacy_id(&uuid::Uuid::new_v4().to_string()));
        assert!(!is_legacy_id("47"));
        assert!(!is_legacy_id("A1B2C3D4000000000000000000000000"));
        assert!(!is_legacy_id("A1B2C3D4-0000-0000-0000-00000000000"));
    }

    #[test]
    fn test_migration_resolves_and_drops() {
        let known = uuid::Uuid::new_v4().to_string();
        let unknown = uuid::Uuid::new_v4().to_string();
        let routes = vec![route(&known, "12"), route("other", "47")];

        let migration = migrate_favorites(&strings(&[&known, &unknown, "47", "12"]), &routes);

        assert!(migration.changed);
        assert_eq!(migration.favorites, strings(&["12", "47"]));
        assert!(migration.favorites.iter().all(|f| !is_legacy_id(f)));
    }

    #[test]
    fn test_migration_is_idempotent() {
        let routes = vec![route("A1B2C3D4-0000-0000-0000-000000000000", "12")];
        let first = migrate_favorites(&strings(&["A1B2C3D4-0000-0000-0000-000000000000", "47"]), &routes);
        let second = migrate_favorites(&first.favorites, &routes);

        assert!(!second.changed);
        assert_eq!(second.favorites, first.favorites);
    }

    #[tokio::test]
    async fn test_read_favorites_persists_migration() {
        let storage = Arc::new(MemoryStorage::with_item(
            FAVORITES_KEY,
            r#"["A1B2C3D4-0000-0000-0000-000000000000", "47"]"#,
        ));
        let store = FavoritesStore::new(storage.clone());
        let routes = vec![route("A1B2C3D4-0000-0000-0000-000000000000", "12")];

        let favorites = store.read_favorites(&routes).await.unwrap();
        assert_eq!(favorites, strings(&["12", "47"]));

        let stored = storage.get_item(FAVORITES_KEY).await.unwrap().unwrap();
        let stored: Vec<String> = serde_json::from_str(&stored).unwrap();
        assert_eq!(stored, strings(&["12", "47"]));
    }

    #[tokio::test]
    async fn test_absent_and_empty_values_mean_no_favorites() {
        let store = FavoritesStore::new(Arc::new(MemoryStorage::new()));
        assert!(store.read_favorites(&[]).await.unwrap().is_empty());

        let store = FavoritesStore::new(Arc::new(MemoryStorage::with_item(FAVORITES_KEY, "")));
        assert!(store.read_favorites(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_entries_are_dropped_quietly() {
        let storage = Arc::new(MemoryStorage::with_item(FAVORITES_KEY, r#"["01", 7, null, "", "01"]"#));
        let store = FavoritesStore::new(storage);

        assert_eq!(store.read_favorites(&[]).await.unwrap(), strings(&["01"]));
    }

    #[tokio::test]
    async fn test_non_list_value_is_a_read_failure() {
        let store = FavoritesStore::new(Arc::new(MemoryStorage::with_item(FAVORITES_KEY, r#"{"a": 1}"#)));
        let err = store.read_favorites(&[]).await.unwrap_err();
        assert!(matches!(err, TransitError::StorageError(_)));
    }

    #[tokio::test]
    async fn test_add_and_remove_on_absent_storage() {
        let store = FavoritesStore::new(Arc::new(MemoryStorage::new()));

        store.add_favorite("12").await.unwrap();
        store.add_favorite("12").await.unwrap();
        store.add_favorite("47").await.unwrap();
        assert_eq!(store.read_favorites(&[]).await.unwrap(), strings(&["12", "47"]));
        assert!(store.is_favorite("47").await.unwrap());

        store.remove_favorite("12").await.unwrap();
        assert_eq!(store.read_favorites(&[]).await.unwrap(), strings(&["47"]));
        assert!(!store.is_favorite("12").await.unwrap());
    }

    #[tokio::test]
    async fn test_default_group() {
        let storage = Arc::new(MemoryStorage::new());
        let store = FavoritesStore::new(storage.clone());
        assert_eq!(store.default_group().await.unwrap(), RouteGroup::All);

        store.set_default_group(RouteGroup::Favorites).await.unwrap();
        assert_eq!(store.default_group().await.unwrap(), RouteGroup::Favorites);
        assert_eq!(storage.get_item(DEFAULT_GROUP_KEY).await.unwrap().as_deref(), Some("1"));

        storage.set_item(DEFAULT_GROUP_KEY, "soon").await.unwrap();
        assert_eq!(store.default_group().await.unwrap(), RouteGroup::All);
    }
}
