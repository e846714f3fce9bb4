//! The object store: a kind registry plus the descriptions loaded from disk.
//!
//! Each description file holds an envelope `{ "Kind": { "Name": .. },
//! "Spec": .. }` (or an array of them). The kind selects a registered parser,
//! which yields a Triggerer description, a Triggerable description or both.
//! Descriptions are keyed by their declared name, separately per role.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::models::{self, Envelope, Parsed, TriggerableDescription, TriggererDescription};
use crate::walk::find_files;
use crate::EngineError;

/// Extension of description files.
pub const DESCRIPTION_EXTENSION: &str = "json";

/// Turns the `Spec` payload of one kind into descriptions.
pub type KindParser = Arc<dyn Fn(Value) -> Result<Parsed, serde_json::Error> + Send + Sync>;

type TriggererMap = HashMap<String, Arc<dyn TriggererDescription>>;
type TriggerableMap = HashMap<String, Arc<dyn TriggerableDescription>>;

#[derive(Clone, Default)]
pub struct ObjectStore {
    kinds: HashMap<String, KindParser>,
    triggerers: TriggererMap,
    triggerables: TriggerableMap,
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("kinds", &self.kinds())
            .field("triggerers", &self.triggerer_ids())
            .field("triggerables", &self.triggerable_ids())
            .finish()
    }
}

impl ObjectStore {
    /// An empty store with no kinds registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that understands `Job`, `Simple` (alias `Oneshot`), `Parshot`
    /// (always parallel), `Retry`, `Timer` and `Unix`.
    pub fn with_default_kinds() -> Self {
        let mut store = Self::new();
        let defaults: [(&str, fn(Value) -> Result<Parsed, serde_json::Error>); 7] = [
            ("Job", models::parse_job),
            ("Simple", models::parse_fanout),
            ("Oneshot", models::parse_fanout),
            ("Parshot", models::parse_parallel_fanout),
            ("Retry", models::parse_retry),
            ("Timer", models::parse_timer),
            ("Unix", models::parse_unix),
        ];
        for (kind, parser) in defaults {
            store.kinds.insert(kind.to_string(), Arc::new(parser));
        }
        store
    }

    /// Associate `kind` with `parser`.
    ///
    /// # Errors
    /// [`EngineError::DuplicateKind`] if the kind already has a parser.
    pub fn register_type<F>(&mut self, kind: impl Into<String>, parser: F) -> Result<(), EngineError>
    where
        F: Fn(Value) -> Result<Parsed, serde_json::Error> + Send + Sync + 'static,
    {
        let kind = kind.into();
        if self.kinds.contains_key(&kind) {
            return Err(EngineError::DuplicateKind(kind));
        }
        self.kinds.insert(kind, Arc::new(parser));
        Ok(())
    }

    /// Load every description below `dir`, replacing what was loaded before.
    ///
    /// The new maps are built aside; on any error the store is left as it
    /// was.
    #[instrument(skip(self, dir), fields(dir = %dir.display()))]
    pub fn load_all(&mut self, dir: &Path) -> Result<(), EngineError> {
        let mut triggerers = TriggererMap::new();
        let mut triggerables = TriggerableMap::new();

        for path in find_files(dir, DESCRIPTION_EXTENSION)? {
            self.load_file(&path, &mut triggerers, &mut triggerables)?;
        }

        info!(
            triggerers = triggerers.len(),
            triggerables = triggerables.len(),
            "descriptions loaded"
        );
        self.triggerers = triggerers;
        self.triggerables = triggerables;
        Ok(())
    }

    fn load_file(
        &self,
        path: &Path,
        triggerers: &mut TriggererMap,
        triggerables: &mut TriggerableMap,
    ) -> Result<(), EngineError> {
        let raw = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        let parse_err = |source| EngineError::Parse {
            path: path.to_path_buf(),
            source,
        };
        let value: Value = serde_json::from_str(&raw).map_err(parse_err)?;

        let envelopes: Vec<Envelope> = if value.is_array() {
            serde_json::from_value(value).map_err(parse_err)?
        } else {
            vec![serde_json::from_value(value).map_err(parse_err)?]
        };

        for envelope in envelopes {
            let kind = match envelope.kind {
                Some(k) if !k.name.is_empty() => k.name,
                _ => {
                    return Err(EngineError::MissingKind {
                        path: path.to_path_buf(),
                    })
                }
            };
            let parser = self.kinds.get(&kind).ok_or_else(|| EngineError::UnknownKind {
                path: path.to_path_buf(),
                kind: kind.clone(),
            })?;
            let parsed = parser(envelope.spec).map_err(parse_err)?;

            if let Some(d) = parsed.triggerer {
                insert_unique(triggerers, d.id().to_string(), d, path, "triggerer")?;
            }
            if let Some(d) = parsed.triggerable {
                insert_unique(triggerables, d.id().to_string(), d, path, "triggerable")?;
            }
            debug!(path = %path.display(), kind = %kind, "description parsed");
        }
        Ok(())
    }

    pub fn triggerer(&self, id: &str) -> Option<&Arc<dyn TriggererDescription>> {
        self.triggerers.get(id)
    }

    pub fn triggerable(&self, id: &str) -> Option<&Arc<dyn TriggerableDescription>> {
        self.triggerables.get(id)
    }

    pub fn triggerer_ids(&self) -> Vec<&str> {
        sorted_keys(&self.triggerers)
    }

    pub fn triggerable_ids(&self) -> Vec<&str> {
        sorted_keys(&self.triggerables)
    }

    pub fn kinds(&self) -> Vec<&str> {
        sorted_keys(&self.kinds)
    }
}

fn insert_unique<V>(
    map: &mut HashMap<String, V>,
    id: String,
    value: V,
    path: &Path,
    role: &'static str,
) -> Result<(), EngineError> {
    if map.contains_key(&id) {
        return Err(EngineError::DuplicateId {
            path: path.to_path_buf(),
            id,
            role,
        });
    }
    map.insert(id, value);
    Ok(())
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<&str> {
    let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FanOutDescription;
    use std::fs;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    const JOB: &str = r#"{ "Kind": { "Name": "Job" }, "Spec": { "Name": "backup" } }"#;
    const TIMER: &str =
        r#"{ "Kind": { "Name": "Timer" }, "Spec": { "Name": "nightly", "Timer": "0 3 * * *" } }"#;
    const FAN: &str = r#"{ "Kind": { "Name": "Simple" }, "Spec": { "Name": "fan" } }"#;
    const PAR: &str = r#"{ "Kind": { "Name": "Parshot" }, "Spec": { "Name": "par" } }"#;
    const FULL_JOB: &str = r#"{ "Kind": { "Name": "Job" }, "Spec": {
        "Name": "offsite",
        "Username": "alice",
        "Service": "b2",
        "ResticPath": "/usr/local/bin/restic",
        "ResticArguments": ["backup", "--tag", "nightly", "/home"],
        "Preconditions": {
            "PathesMust": ["/mnt/nas"],
            "HostsMustRoute": ["nas.local"],
            "HostsMustConnect": [{ "Host": "nas.local", "Port": 22 }]
        },
        "CheckPrecondsMaxTimes": 5,
        "CheckPrecondsEveryMilli": 1500
    } }"#;

    #[test]
    fn classifies_descriptions_by_role() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "job.json", JOB);
        write(dir.path(), "timer.json", TIMER);
        write(dir.path(), "fan.json", FAN);
        write(dir.path(), "par.json", PAR);

        let mut store = ObjectStore::with_default_kinds();
        store.load_all(dir.path()).unwrap();

        assert_eq!(store.triggerer_ids(), vec!["fan", "nightly", "par"]);
        assert_eq!(store.triggerable_ids(), vec!["backup", "fan", "par"]);
        assert!(format!("{:?}", store.triggerable("par").unwrap()).contains("parallel: true"));
        assert!(format!("{:?}", store.triggerable("fan").unwrap()).contains("parallel: false"));
    }

    #[test]
    fn array_files_hold_several_descriptions() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "all.json", &format!("[{JOB}, {TIMER}]"));

        let mut store = ObjectStore::with_default_kinds();
        store.load_all(dir.path()).unwrap();
        assert!(store.triggerable("backup").is_some());
        assert!(store.triggerer("nightly").is_some());
    }

    #[test]
    fn loading_twice_gives_the_same_maps() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "job.json", FULL_JOB);
        write(dir.path(), "timer.json", TIMER);
        write(dir.path(), "par.json", PAR);

        let snapshot = |store: &ObjectStore| -> Vec<String> {
            let triggerers = store
                .triggerer_ids()
                .into_iter()
                .map(|id| format!("{id}: {:?}", store.triggerer(id)));
            let triggerables = store
                .triggerable_ids()
                .into_iter()
                .map(|id| format!("{id}: {:?}", store.triggerable(id)));
            triggerers.chain(triggerables).collect()
        };

        let mut store = ObjectStore::with_default_kinds();
        store.load_all(dir.path()).unwrap();
        let first = snapshot(&store);
        store.load_all(dir.path()).unwrap();
        let second = snapshot(&store);

        assert_eq!(first, second);
        let job = first.iter().find(|s| s.starts_with("offsite:")).unwrap();
        assert!(job.contains("nightly") && job.contains("nas.local"), "{job}");
        assert!(job.contains("1500"), "{job}");
    }

    #[test]
    fn errors_name_the_offending_file() {
        let cases = [
            ("broken.json", "{ not json", "malformed"),
            ("nokind.json", r#"{ "Spec": { "Name": "x" } }"#, "does not name a kind"),
            ("alien.json", r#"{ "Kind": { "Name": "Alien" }, "Spec": {} }"#, "unknown kind"),
        ];
        for (file, body, expected) in cases {
            let dir = tempfile::tempdir().unwrap();
            write(dir.path(), file, body);
            let err = ObjectStore::with_default_kinds()
                .load_all(dir.path())
                .unwrap_err()
                .to_string();
            assert!(err.contains(file), "{err}");
            assert!(err.contains(expected), "{err}");
        }
    }

    #[test]
    fn duplicate_ids_within_a_role_fail() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.json", JOB);
        write(dir.path(), "b.json", JOB);
        assert!(matches!(
            ObjectStore::with_default_kinds().load_all(dir.path()),
            Err(EngineError::DuplicateId { ref id, role: "triggerable", .. }) if id == "backup"
        ));
    }

    #[test]
    fn same_name_in_different_roles_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "job.json", JOB);
        write(
            dir.path(),
            "timer.json",
            r#"{ "Kind": { "Name": "Timer" }, "Spec": { "Name": "backup", "Timer": "0 3 * * *" } }"#,
        );
        ObjectStore::with_default_kinds().load_all(dir.path()).unwrap();
    }

    #[test]
    fn failed_load_keeps_previous_maps() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "job.json", JOB);
        let mut store = ObjectStore::with_default_kinds();
        store.load_all(dir.path()).unwrap();

        write(dir.path(), "zz-broken.json", "[");
        assert!(store.load_all(dir.path()).is_err());
        assert_eq!(store.triggerable_ids(), vec!["backup"]);
    }

    #[test]
    fn registering_a_kind_twice_fails() {
        let mut store = ObjectStore::new();
        let parse = |spec: Value| -> Result<Parsed, serde_json::Error> {
            Ok(Parsed::both(serde_json::from_value::<FanOutDescription>(spec)?))
        };
        store.register_type("Fan", parse).unwrap();
        assert!(matches!(
            store.register_type("Fan", parse),
            Err(EngineError::DuplicateKind(ref k)) if k == "Fan"
        ));
        assert!(matches!(
            ObjectStore::with_default_kinds().register_type("Job", parse),
            Err(EngineError::DuplicateKind(_))
        ));
    }
}
