use crate::core::ControllerError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordType {
    Cname,
    A,
    Txt,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    pub record_type: RecordType,
    pub name: String,
    pub data: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameServiceError {
    #[error("record {0} does not exist")]
    NoSuchRecord(RecordId),

    #[error("name service unavailable: {0}")]
    Unavailable(String),
}

impl From<NameServiceError> for ControllerError {
    fn from(err: NameServiceError) -> Self {
        match err {
            NameServiceError::NoSuchRecord(_) => ControllerError::not_found(err.to_string()),
            NameServiceError::Unavailable(message) => ControllerError::Storage(message),
        }
    }
}

pub type NameServiceResult<T> = std::result::Result<T, NameServiceError>;

/// DNS provider operations the controller depends on.
#[async_trait]
pub trait NameService: Send + Sync {
    async fn find_records(&self, record_type: RecordType, name: &str) -> NameServiceResult<Vec<Record>>;

    async fn create_cname(&self, name: &str, target: &str) -> NameServiceResult<RecordId>;

    async fn update_record(&self, id: &RecordId, target: &str) -> NameServiceResult<()>;
}

#[derive(Debug, Default)]
struct Records {
    next_id: u64,
    by_id: BTreeMap<RecordId, Record>,
}

#[derive(Debug, Default)]
pub struct MemoryNameService {
    records: RwLock<Records>,
    unavailable: AtomicBool,
}

impl MemoryNameService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn records(&self) -> Vec<Record> {
        self.records.read().await.by_id.values().cloned().collect()
    }

    /// Target of the CNAME record for `name`, if exactly one exists.
    pub async fn cname_target(&self, name: &str) -> Option<String> {
        let records = self.records.read().await;
        let mut matching = records
            .by_id
            .values()
            .filter(|record| record.record_type == RecordType::Cname && record.name == name);
        match (matching.next(), matching.next()) {
            (Some(record), None) => Some(record.data.clone()),
            _ => None,
        }
    }

    fn check_available(&self) -> NameServiceResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(NameServiceError::Unavailable("name service is down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NameService for MemoryNameService {
    async fn find_records(&self, record_type: RecordType, name: &str) -> NameServiceResult<Vec<Record>> {
        self.check_available()?;
        Ok(self
            .records
            .read()
            .await
            .by_id
            .values()
            .filter(|record| record.record_type == record_type && record.name == name)
            .cloned()
            .collect())
    }

    async fn create_cname(&self, name: &str, target: &str) -> NameServiceResult<RecordId> {
        self.check_available()?;
        let mut records = self.records.write().await;
        records.next_id += 1;
        let id = RecordId::new(records.next_id.to_string());
        records.by_id.insert(
            id.clone(),
            Record {
                id: id.clone(),
                record_type: RecordType::Cname,
                name: name.to_string(),
                data: target.to_string(),
            },
        );
        Ok(id)
    }

    async fn update_record(&self, id: &RecordId, target: &str) -> NameServiceResult<()> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let record = records
            .by_id
            .get_mut(id)
            .ok_or_else(|| NameServiceError::NoSuchRecord(id.clone()))?;
        record.data = target.to_string();
        Ok(())
    }
}
