pub mod remote;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::TransportError;
use crate::models::Variable;

pub use remote::{RawRecord, RemoteClient};

/// Which categories of change `push` is allowed to apply.
///
/// The default only creates; overwriting and deleting are opt-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOptions {
    pub allow_create: bool,
    pub allow_update: bool,
    pub allow_delete: bool,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            allow_create: true,
            allow_update: false,
            allow_delete: false,
        }
    }
}

/// Number of remote calls a successful push made per category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Reconciles a local working set of variables against a remote snapshot.
///
/// Both maps are keyed by [`Variable::uid`] and owned exclusively by this
/// value; everything handed out is a clone.
pub struct VariableSet<C> {
    client: C,
    working: IndexMap<String, Variable>,
    snapshot: IndexMap<String, Variable>,
}

impl<C: RemoteClient> VariableSet<C> {
    /// Fetch the remote state and start with a working set equal to it
    pub async fn initialize(client: C) -> Result<Self, TransportError> {
        let mut set = Self {
            client,
            working: IndexMap::new(),
            snapshot: IndexMap::new(),
        };
        set.pull(true).await?;
        Ok(set)
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn all(&self) -> Vec<Variable> {
        self.working.values().cloned().collect()
    }

    /// Variables in the working set that the remote doesn't have yet
    pub fn created(&self) -> Vec<Variable> {
        self.working
            .iter()
            .filter(|(uid, _)| !self.snapshot.contains_key(*uid))
            .map(|(_, var)| var.clone())
            .collect()
    }

    /// Variables on the remote that the working set dropped
    pub fn deleted(&self) -> Vec<Variable> {
        self.snapshot
            .iter()
            .filter(|(uid, _)| !self.working.contains_key(*uid))
            .map(|(_, var)| var.clone())
            .collect()
    }

    /// Working-set versions of variables whose content differs from the remote
    pub fn changed(&self) -> Vec<Variable> {
        self.working
            .iter()
            .filter(|(uid, var)| self.snapshot.get(*uid).is_some_and(|remote| remote != *var))
            .map(|(_, var)| var.clone())
            .collect()
    }

    /// Reset the working set to the remote snapshot, discarding local edits.
    /// With `fresh` the snapshot is fetched again first.
    pub async fn pull(&mut self, fresh: bool) -> Result<(), TransportError> {
        if fresh {
            self.fetch().await?;
        }
        self.working = self.snapshot.clone();
        Ok(())
    }

    /// Apply the allowed categories of change to the remote, in the order
    /// create, update, delete.
    ///
    /// Every call is logged by uid before it is made, never with its value.
    ///
    /// Calls are issued one at a time and nothing is rolled back: if one fails
    /// the error is returned and every earlier call stays applied. Local state
    /// is left untouched either way.
    pub async fn push(&self, options: PushOptions) -> Result<PushReport, TransportError> {
        let mut report = PushReport::default();

        if options.allow_create {
            for var in self.created() {
                tracing::info!("Create: {}", var.uid());
                self.client.create(&var.raw_record()).await?;
                report.created += 1;
            }
        }

        if options.allow_update {
            for var in self.changed() {
                tracing::info!("Update: {}", var.uid());
                self.client
                    .update(var.key(), &var.raw_record(), var.environment_scope())
                    .await?;
                report.updated += 1;
            }
        }

        if options.allow_delete {
            for var in self.deleted() {
                tracing::info!("Delete: {}", var.uid());
                self.client.delete(var.key(), var.environment_scope()).await?;
                report.deleted += 1;
            }
        }

        Ok(report)
    }

    /// Insert or replace by uid
    pub fn add(&mut self, var: Variable) {
        self.working.insert(var.uid(), var);
    }

    /// Remove by uid; missing variables are ignored
    pub fn remove(&mut self, var: &Variable) {
        self.working.shift_remove(&var.uid());
    }

    /// Make the working set exactly `vars`. Later entries win on uid collisions.
    pub fn replace_all<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = Variable>,
    {
        self.working.clear();
        for var in vars {
            self.add(var);
        }
    }

    async fn fetch(&mut self) -> Result<(), TransportError> {
        let records = self.client.list().await?;
        self.snapshot = records
            .iter()
            .map(Variable::from_value)
            .map(|var| (var.uid(), var))
            .collect();
        tracing::debug!("Fetched {} remote variables", self.snapshot.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::io;
    use std::sync::{Arc, Mutex};
    use tokio_test::assert_ok;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        List,
        Create(String),
        Update(String, String),
        Delete(String, String),
    }

    /// In-memory remote that records every call it receives
    #[derive(Default)]
    struct FakeRemote {
        records: Mutex<Vec<Value>>,
        calls: Mutex<Vec<Call>>,
        fail_on_create: Option<String>,
        fail_list: bool,
    }

    impl FakeRemote {
        fn with(records: Vec<Value>) -> Self {
            Self {
                records: Mutex::new(records),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn writes(&self) -> Vec<Call> {
            self.calls().into_iter().filter(|c| *c != Call::List).collect()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    fn failure() -> TransportError {
        TransportError::Status {
            status: 500,
            body: "boom".to_string(),
        }
    }

    #[async_trait]
    impl RemoteClient for FakeRemote {
        async fn list(&self) -> Result<Vec<Value>, TransportError> {
            self.record(Call::List);
            if self.fail_list {
                return Err(failure());
            }
            Ok(self.records.lock().unwrap().clone())
        }

        async fn create(&self, record: &RawRecord) -> Result<Value, TransportError> {
            let key = record["key"].as_str().unwrap_or_default().to_string();
            self.record(Call::Create(key.clone()));
            if self.fail_on_create.as_deref() == Some(key.as_str()) {
                return Err(failure());
            }
            Ok(Value::Object(record.clone()))
        }

        async fn update(&self, key: &str, record: &RawRecord, scope: &str) -> Result<Value, TransportError> {
            self.record(Call::Update(key.to_string(), scope.to_string()));
            Ok(Value::Object(record.clone()))
        }

        async fn delete(&self, key: &str, scope: &str) -> Result<(), TransportError> {
            self.record(Call::Delete(key.to_string(), scope.to_string()));
            Ok(())
        }
    }

    fn keys(vars: &[Variable]) -> Vec<&str> {
        vars.iter().map(Variable::key).collect()
    }

    #[tokio::test]
    async fn test_initialize_copies_snapshot() {
        let remote = FakeRemote::with(vec![
            json!({"key": "A", "value": "1", "protected": "true", "id": 7}),
            json!({"key": "B", "value": "2", "environment_scope": "prod"}),
        ]);
        let set = VariableSet::initialize(remote).await.unwrap();

        assert_eq!(keys(&set.all()), vec!["A", "B"]);
        assert!(set.all()[0].protected());
        assert!(set.created().is_empty());
        assert!(set.changed().is_empty());
        assert!(set.deleted().is_empty());
        assert_eq!(set.client().calls(), vec![Call::List]);
    }

    #[tokio::test]
    async fn test_initialize_propagates_transport_error() {
        let remote = FakeRemote {
            fail_list: true,
            ..FakeRemote::default()
        };
        let result = VariableSet::initialize(remote).await;
        assert!(matches!(result, Err(TransportError::Status { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_duplicate_remote_uids_keep_last() {
        let remote = FakeRemote::with(vec![
            json!({"key": "A", "value": "first"}),
            json!({"key": "A", "value": "second"}),
        ]);
        let set = VariableSet::initialize(remote).await.unwrap();
        let all = set.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].value(), "second");
    }

    #[tokio::test]
    async fn test_add_replaces_same_uid() {
        let mut set = VariableSet::initialize(FakeRemote::default()).await.unwrap();
        set.add(Variable::new("A", "1"));
        set.add(Variable::new("A", "2").with_masked(true));
        set.add(Variable::new("A", "3").with_scope("staging"));

        let all = set.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], Variable::new("A", "2").with_masked(true));
        assert_eq!(all[1].environment_scope(), "staging");
    }

    #[tokio::test]
    async fn test_remove_missing_is_noop() {
        let mut set = VariableSet::initialize(FakeRemote::with(vec![json!({"key": "A"})]))
            .await
            .unwrap();
        set.remove(&Variable::new("NOPE", ""));
        set.remove(&Variable::new("A", "").with_scope("other"));
        assert_eq!(set.all().len(), 1);

        // removal goes by uid, not by content
        set.remove(&Variable::new("A", "whatever"));
        assert!(set.all().is_empty());
    }

    #[tokio::test]
    async fn test_diff_partitions() {
        let remote = FakeRemote::with(vec![
            json!({"key": "A", "value": "1"}),
            json!({"key": "B", "value": "2"}),
        ]);
        let mut set = VariableSet::initialize(remote).await.unwrap();
        set.remove(&Variable::new("B", "2"));
        set.add(Variable::new("C", "3"));

        assert_eq!(set.created(), vec![Variable::new("C", "3")]);
        assert_eq!(set.deleted(), vec![Variable::new("B", "2")]);
        assert!(set.changed().is_empty());

        set.add(Variable::new("A", "9"));
        assert_eq!(set.changed(), vec![Variable::new("A", "9")]);
    }

    #[tokio::test]
    async fn test_pull_cached_restores_snapshot() {
        let remote = FakeRemote::with(vec![json!({"key": "A", "value": "1"})]);
        let mut set = VariableSet::initialize(remote).await.unwrap();
        set.add(Variable::new("A", "changed"));
        set.add(Variable::new("B", "new"));
        set.remove(&Variable::new("A", ""));

        assert_ok!(set.pull(false).await);
        assert_eq!(set.all(), vec![Variable::new("A", "1")]);
        // no second fetch
        assert_eq!(set.client().calls(), vec![Call::List]);

        // the working set is a copy: editing it leaves the snapshot alone
        set.add(Variable::new("A", "2"));
        assert_eq!(set.changed(), vec![Variable::new("A", "2")]);
        set.pull(false).await.unwrap();
        assert_eq!(set.all(), vec![Variable::new("A", "1")]);
    }

    #[tokio::test]
    async fn test_pull_fresh_refetches() {
        let remote = FakeRemote::with(vec![json!({"key": "A", "value": "1"})]);
        let mut set = VariableSet::initialize(remote).await.unwrap();
        set.client()
            .records
            .lock()
            .unwrap()
            .push(json!({"key": "B", "value": "2"}));

        set.pull(false).await.unwrap();
        assert_eq!(set.all().len(), 1);

        set.pull(true).await.unwrap();
        assert_eq!(keys(&set.all()), vec!["A", "B"]);
        assert_eq!(set.client().calls(), vec![Call::List, Call::List]);
    }

    #[tokio::test]
    async fn test_default_push_only_creates() {
        let remote = FakeRemote::with(vec![
            json!({"key": "A", "value": "1"}),
            json!({"key": "B", "value": "2"}),
        ]);
        let mut set = VariableSet::initialize(remote).await.unwrap();
        set.add(Variable::new("A", "changed"));
        set.remove(&Variable::new("B", ""));
        set.add(Variable::new("C", "3"));

        let report = set.push(PushOptions::default()).await.unwrap();
        assert_eq!(report, PushReport { created: 1, updated: 0, deleted: 0 });
        assert_eq!(set.client().writes(), vec![Call::Create("C".to_string())]);
    }

    #[tokio::test]
    async fn test_push_create_and_delete() {
        let remote = FakeRemote::with(vec![json!({"key": "FOO", "value": "1"})]);
        let mut set = VariableSet::initialize(remote).await.unwrap();
        set.add(Variable::new("BAR", "2"));
        set.remove(&Variable::new("FOO", "1"));

        let options = PushOptions {
            allow_delete: true,
            ..PushOptions::default()
        };
        set.push(options).await.unwrap();

        assert_eq!(
            set.client().writes(),
            vec![
                Call::Create("BAR".to_string()),
                Call::Delete("FOO".to_string(), "*".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_push_update_targets_key_and_scope() {
        let remote = FakeRemote::with(vec![json!({"key": "A", "value": "1", "environment_scope": "prod"})]);
        let mut set = VariableSet::initialize(remote).await.unwrap();
        set.add(Variable::new("A", "2").with_scope("prod"));

        let options = PushOptions {
            allow_create: false,
            allow_update: true,
            allow_delete: false,
        };
        let report = set.push(options).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(
            set.client().writes(),
            vec![Call::Update("A".to_string(), "prod".to_string())]
        );
    }

    #[tokio::test]
    async fn test_push_does_not_touch_local_state() {
        let mut set = VariableSet::initialize(FakeRemote::default()).await.unwrap();
        set.add(Variable::new("A", "1"));
        set.push(PushOptions::default()).await.unwrap();

        // the snapshot is only refreshed by an explicit fresh pull
        assert_eq!(set.created(), vec![Variable::new("A", "1")]);
    }

    #[tokio::test]
    async fn test_push_failure_is_partial() {
        let remote = FakeRemote {
            records: Mutex::new(vec![json!({"key": "OLD"})]),
            fail_on_create: Some("B".to_string()),
            ..FakeRemote::default()
        };
        let mut set = VariableSet::initialize(remote).await.unwrap();
        set.add(Variable::new("A", "1"));
        set.add(Variable::new("B", "2"));
        set.add(Variable::new("C", "3"));
        set.remove(&Variable::new("OLD", ""));

        let options = PushOptions {
            allow_create: true,
            allow_update: true,
            allow_delete: true,
        };
        let err = set.push(options).await.unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 500, .. }));

        // A went through, B was attempted, nothing after it ran
        assert_eq!(
            set.client().writes(),
            vec![Call::Create("A".to_string()), Call::Create("B".to_string())]
        );
        assert_eq!(keys(&set.created()), vec!["A", "B", "C"]);
        assert_eq!(keys(&set.deleted()), vec!["OLD"]);
    }

    #[tokio::test]
    async fn test_replace_all() {
        let remote = FakeRemote::with(vec![
            json!({"key": "A", "value": "1"}),
            json!({"key": "B", "value": "2"}),
        ]);
        let mut set = VariableSet::initialize(remote).await.unwrap();
        set.replace_all(vec![
            Variable::new("A", "1"),
            Variable::new("C", "x"),
            Variable::new("C", "3"),
        ]);

        assert_eq!(set.created(), vec![Variable::new("C", "3")]);
        assert_eq!(keys(&set.deleted()), vec!["B"]);
        assert!(set.changed().is_empty());
    }

    /// Shared buffer the test subscriber writes formatted events into
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }

        fn install(&self) -> tracing::subscriber::DefaultGuard {
            let writer = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_writer(move || writer.clone())
                .with_ansi(false)
                .with_max_level(tracing::Level::INFO)
                .finish();
            tracing::subscriber::set_default(subscriber)
        }
    }

    #[tokio::test]
    async fn test_push_reports_attempt_before_failing_call() {
        let logs = LogBuffer::default();
        let _guard = logs.install();

        let remote = FakeRemote {
            fail_on_create: Some("B".to_string()),
            ..FakeRemote::default()
        };
        let mut set = VariableSet::initialize(remote).await.unwrap();
        set.add(Variable::new("A", "1"));
        set.add(Variable::new("B", "2"));
        set.add(Variable::new("C", "3"));

        assert!(set.push(PushOptions::default()).await.is_err());

        let output = logs.contents();
        assert!(output.contains("Create: * // A"), "{}", output);
        assert!(output.contains("Create: * // B"), "{}", output);
        assert!(!output.contains("Create: * // C"), "{}", output);
    }

    #[tokio::test]
    async fn test_push_log_omits_values() {
        let logs = LogBuffer::default();
        let _guard = logs.install();

        let remote = FakeRemote::with(vec![
            json!({"key": "OLD", "value": "old-secret", "masked": true}),
            json!({"key": "TOKEN", "value": "first-secret", "masked": true}),
        ]);
        let mut set = VariableSet::initialize(remote).await.unwrap();
        set.remove(&Variable::new("OLD", ""));
        set.add(Variable::new("TOKEN", "second-secret").with_masked(true));
        set.add(Variable::new("API_KEY", "new-secret").with_masked(true).with_protected(true));

        let options = PushOptions {
            allow_create: true,
            allow_update: true,
            allow_delete: true,
        };
        let report = set.push(options).await.unwrap();
        assert_eq!(report, PushReport { created: 1, updated: 1, deleted: 1 });

        let output = logs.contents();
        assert!(output.contains("Create: * // API_KEY"), "{}", output);
        assert!(output.contains("Update: * // TOKEN"), "{}", output);
        assert!(output.contains("Delete: * // OLD"), "{}", output);
        assert!(!output.contains("secret"), "values leaked into log: {}", output);
    }
}
