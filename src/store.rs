//! Rule Store - Channels, Rules and the Rule Set Loader
//!
//! The store is read-only from here. Eligibility and ordering are enforced
//! by the loader regardless of what the backend already filters.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const PRODUCTION_STATUS: &str = "production";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub body: String,
    pub score: f64,
    pub version_tag: String,
    pub author: String,
    pub description: String,
    pub fingerprint: String,
    pub status: String,
    pub active: bool,
}

impl Rule {
    /// Only active rules in production status ship to a channel
    pub fn is_eligible(&self) -> bool {
        self.active && self.status == PRODUCTION_STATUS
    }
}

/// Which channels a run covers
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSelector {
    #[default]
    All,
    ById(i64),
    ByName(String),
}

impl fmt::Display for ChannelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelSelector::All => write!(f, "all channels"),
            ChannelSelector::ById(id) => write!(f, "channel id {}", id),
            ChannelSelector::ByName(name) => write!(f, "channel '{}'", name),
        }
    }
}

/// Ordered eligible rules of one channel at generation time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelRuleSet {
    pub channel: Channel,
    pub rules: Vec<Rule>,
}

impl ChannelRuleSet {
    /// Apply the eligibility filter and sort by rule name
    pub fn resolve(channel: Channel, rules: Vec<Rule>) -> Self {
        let mut rules: Vec<Rule> = rules.into_iter().filter(Rule::is_eligible).collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        Self { channel, rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Cannot open rule database {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("No channel matched {0}")]
    NotFound(ChannelSelector),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Read access to channels and their bound rules
pub trait RuleStore {
    fn channels(&self, selector: &ChannelSelector) -> Result<Vec<Channel>, StoreError>;

    /// Rules bound to a channel. Backends may pre-filter; the loader filters again.
    fn rules_for_channel(&self, channel_id: i64) -> Result<Vec<Rule>, StoreError>;
}

// --- SQLite backend ---

const CHANNEL_COLUMNS: &str = "SELECT id, name, COALESCE(description, ''), is_default FROM channels";

const RULES_FOR_CHANNEL: &str = "
    SELECT r.id, r.rule_name, r.rule_body, r.score, COALESCE(r.version_tag, ''),
           COALESCE(r.author, ''), COALESCE(r.description, ''), COALESCE(r.fingerprint, ''),
           r.status, r.active
    FROM rules r
    JOIN channel_rules cr ON r.id = cr.rule_id
    WHERE cr.channel_id = ?1
      AND r.active = 1
      AND r.status = 'production'
    ORDER BY r.rule_name";

pub struct SqliteRuleStore {
    conn: Connection,
}

impl SqliteRuleStore {
    /// Open the database read-only
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| StoreError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "opened rule database");
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    fn query_channels<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<Channel>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok(Channel {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                is_default: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl RuleStore for SqliteRuleStore {
    fn channels(&self, selector: &ChannelSelector) -> Result<Vec<Channel>, StoreError> {
        // One query per branch; no "col = ? OR ? IS NULL" tricks.
        match selector {
            ChannelSelector::All => {
                self.query_channels(&format!("{CHANNEL_COLUMNS} ORDER BY id"), params![])
            }
            ChannelSelector::ById(id) => {
                self.query_channels(&format!("{CHANNEL_COLUMNS} WHERE id = ?1"), params![id])
            }
            ChannelSelector::ByName(name) => {
                self.query_channels(&format!("{CHANNEL_COLUMNS} WHERE name = ?1"), params![name])
            }
        }
    }

    fn rules_for_channel(&self, channel_id: i64) -> Result<Vec<Rule>, StoreError> {
        let mut stmt = self.conn.prepare(RULES_FOR_CHANNEL)?;
        let rows = stmt.query_map(params![channel_id], |row| {
            Ok(Rule {
                id: row.get(0)?,
                name: row.get(1)?,
                body: row.get(2)?,
                score: row.get(3)?,
                version_tag: row.get(4)?,
                author: row.get(5)?,
                description: row.get(6)?,
                fingerprint: row.get(7)?,
                status: row.get(8)?,
                active: row.get(9)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

// --- In-memory backend ---

/// Store held entirely in memory. Returns bindings unfiltered.
#[derive(Debug, Clone, Default)]
pub struct MemoryRuleStore {
    channels: Vec<Channel>,
    rules: HashMap<i64, Rule>,
    bindings: Vec<(i64, i64)>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&mut self, channel: Channel) {
        self.channels.push(channel);
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.insert(rule.id, rule);
    }

    pub fn bind(&mut self, channel_id: i64, rule_id: i64) {
        self.bindings.push((channel_id, rule_id));
    }
}

impl RuleStore for MemoryRuleStore {
    fn channels(&self, selector: &ChannelSelector) -> Result<Vec<Channel>, StoreError> {
        let mut channels: Vec<Channel> = self
            .channels
            .iter()
            .filter(|c| match selector {
                ChannelSelector::All => true,
                ChannelSelector::ById(id) => c.id == *id,
                ChannelSelector::ByName(name) => &c.name == name,
            })
            .cloned()
            .collect();
        channels.sort_by_key(|c| c.id);
        Ok(channels)
    }

    fn rules_for_channel(&self, channel_id: i64) -> Result<Vec<Rule>, StoreError> {
        Ok(self
            .bindings
            .iter()
            .filter(|(c, _)| *c == channel_id)
            .filter_map(|(_, r)| self.rules.get(r).cloned())
            .collect())
    }
}

/// Resolves channels and their rule sets from a store
pub struct RuleSetLoader<S> {
    store: S,
}

impl<S: RuleStore> RuleSetLoader<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Channels matching the selector, in store order
    pub fn select_channels(&self, selector: &ChannelSelector) -> Result<Vec<Channel>, LoadError> {
        let channels = self.store.channels(selector)?;
        if channels.is_empty() {
            return Err(LoadError::NotFound(selector.clone()));
        }
        debug!(count = channels.len(), %selector, "selected channels");
        Ok(channels)
    }

    pub fn rule_set(&self, channel: &Channel) -> Result<ChannelRuleSet, LoadError> {
        let rules = self.store.rules_for_channel(channel.id)?;
        let set = ChannelRuleSet::resolve(channel.clone(), rules);
        if set.is_empty() {
            warn!(channel = %channel.name, id = channel.id, "channel has no active production rules");
        }
        Ok(set)
    }
}
