//! Redis store implementation for the Matching Engine
//!
//! Layout under the configured key prefix:
//!
//! - `{p}:bet:{id}` hash with one field per bet attribute
//! - `{p}:bet:{id}:matches` / `{p}:bet:{id}:refunds` lists of JSON records
//! - `{p}:event:{event}:bets`, `{p}:user:{user}:bets`, `{p}:bets` id sets
//! - `{p}:locked_events` set of locked event ids
//!
//! Compare-and-swap operations run as Lua scripts so the check and the
//! write are a single atomic step on the server.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use common::{BetId, CoinKind, EventId, UserId};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::domain::{Bet, BetSide, BetStatus, Match, Refund};
use crate::store::traits::{BetQuery, BetStore, StoreError, StoreResult};
use config::RedisConfig;

// KEYS[1] bet hash, KEYS[2..4] id indexes; ARGV[1] bet id, ARGV[2..] field/value pairs
const INSERT_BET_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then return 'exists' end
redis.call('HSET', KEYS[1], unpack(ARGV, 2))
redis.call('SADD', KEYS[2], ARGV[1])
redis.call('SADD', KEYS[3], ARGV[1])
redis.call('SADD', KEYS[4], ARGV[1])
return 'ok'
"#;

const APPLY_MATCH_SCRIPT: &str = r#"
local function is_open(s) return s == 'pending' or s == 'partially_matched' end
local a = redis.call('HMGET', KEYS[1], 'matched_amount', 'amount', 'status')
local b = redis.call('HMGET', KEYS[2], 'matched_amount', 'amount', 'status')
if not a[1] then return 'missing:a' end
if not b[1] then return 'missing:b' end
if a[1] ~= ARGV[1] or b[1] ~= ARGV[2] then return 'conflict' end
if not is_open(a[3]) or not is_open(b[3]) then return 'conflict' end
local amount = tonumber(ARGV[3])
if tonumber(a[1]) + amount > tonumber(a[2]) or tonumber(b[1]) + amount > tonumber(b[2]) then
  return 'overfill'
end
redis.call('HINCRBY', KEYS[1], 'matched_amount', amount)
redis.call('HINCRBY', KEYS[2], 'matched_amount', amount)
redis.call('HSET', KEYS[1], 'updated_at', ARGV[5])
redis.call('HSET', KEYS[2], 'updated_at', ARGV[5])
redis.call('RPUSH', KEYS[3], ARGV[4])
redis.call('RPUSH', KEYS[4], ARGV[4])
return 'ok'
"#;

const CANCEL_SCRIPT: &str = r#"
local cur = redis.call('HMGET', KEYS[1], 'matched_amount', 'status')
if not cur[1] then return 'missing' end
if cur[2] ~= 'pending' and cur[2] ~= 'partially_matched' then return 'status:' .. cur[2] end
if cur[1] ~= ARGV[1] then return 'conflict' end
redis.call('HSET', KEYS[1], 'status', 'cancelled', 'updated_at', ARGV[2])
return 'ok'
"#;

// ARGV[1] new status, ARGV[2] timestamp, ARGV[3..] allowed current statuses
const UPDATE_STATUS_SCRIPT: &str = r#"
local cur = redis.call('HGET', KEYS[1], 'status')
if not cur then return 'missing' end
for i = 3, #ARGV do
  if cur == ARGV[i] then
    redis.call('HSET', KEYS[1], 'status', ARGV[1], 'updated_at', ARGV[2])
    return 'ok'
  end
end
return 'status:' .. cur
"#;

const UPDATE_SPREAD_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return 'missing' end
redis.call('HSET', KEYS[1], 'current_spread', ARGV[1], 'updated_at', ARGV[2])
return 'ok'
"#;

fn map_redis_error(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Backend(e.to_string())
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn insert_outcome(bet_id: BetId, outcome: &str) -> StoreResult<()> {
    match outcome {
        "ok" => Ok(()),
        "exists" => Err(StoreError::AlreadyExists(bet_id)),
        other => Err(StoreError::Backend(format!("unexpected insert result '{}'", other))),
    }
}

/// Redis-backed bet store
pub struct RedisBetStore {
    conn: ConnectionManager,
    key_prefix: String,
    insert_bet: Script,
    apply_match: Script,
    cancel: Script,
    update_status: Script,
    update_spread: Script,
}

impl RedisBetStore {
    /// Connect to Redis and prepare the scripts
    pub async fn new(config: &RedisConfig) -> StoreResult<Self> {
        let connection_string = if config.password.is_empty() {
            format!("redis://{}:{}/{}", config.host, config.port, config.db_index)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                config.password, config.host, config.port, config.db_index
            )
        };

        info!(host = %config.host, port = config.port, db = config.db_index, "Connecting to Redis");

        let client = redis::Client::open(connection_string.as_str()).map_err(map_redis_error)?;
        let conn = client.get_connection_manager().await.map_err(map_redis_error)?;

        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            insert_bet: Script::new(INSERT_BET_SCRIPT),
            apply_match: Script::new(APPLY_MATCH_SCRIPT),
            cancel: Script::new(CANCEL_SCRIPT),
            update_status: Script::new(UPDATE_STATUS_SCRIPT),
            update_spread: Script::new(UPDATE_SPREAD_SCRIPT),
        })
    }

    fn bet_key(&self, bet_id: BetId) -> String {
        format!("{}:bet:{}", self.key_prefix, bet_id)
    }

    fn matches_key(&self, bet_id: BetId) -> String {
        format!("{}:bet:{}:matches", self.key_prefix, bet_id)
    }

    fn refunds_key(&self, bet_id: BetId) -> String {
        format!("{}:bet:{}:refunds", self.key_prefix, bet_id)
    }

    fn event_index_key(&self, event_id: &EventId) -> String {
        format!("{}:event:{}:bets", self.key_prefix, event_id)
    }

    fn user_index_key(&self, user_id: &UserId) -> String {
        format!("{}:user:{}:bets", self.key_prefix, user_id)
    }

    fn all_bets_key(&self) -> String {
        format!("{}:bets", self.key_prefix)
    }

    fn locked_events_key(&self) -> String {
        format!("{}:locked_events", self.key_prefix)
    }

    /// Narrowest id index that covers `query`
    fn index_key(&self, query: &BetQuery) -> String {
        match (&query.event_id, &query.user_id) {
            (Some(event_id), _) => self.event_index_key(event_id),
            (None, Some(user_id)) => self.user_index_key(user_id),
            (None, None) => self.all_bets_key(),
        }
    }

    async fn load_bets(&self, ids: &[String]) -> StoreResult<Vec<Bet>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for id in ids {
            pipe.hgetall(format!("{}:bet:{}", self.key_prefix, id));
        }
        let mut conn = self.conn.clone();
        let rows: Vec<HashMap<String, String>> =
            pipe.query_async(&mut conn).await.map_err(map_redis_error)?;

        rows.into_iter()
            .filter(|row| !row.is_empty())
            .map(bet_from_fields)
            .collect()
    }

    async fn read_list<T: serde::de::DeserializeOwned>(&self, key: String) -> StoreResult<Vec<T>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(key, 0, -1).await.map_err(map_redis_error)?;
        raw.iter()
            .map(|json| {
                serde_json::from_str(json).map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .collect()
    }

    fn script_outcome(&self, bet_id: BetId, to: BetStatus, outcome: &str) -> StoreResult<()> {
        match outcome {
            "ok" => Ok(()),
            "missing" => Err(StoreError::NotFound(bet_id)),
            "conflict" => Err(StoreError::Conflict(format!("bet {} changed concurrently", bet_id))),
            other => match other.strip_prefix("status:").and_then(BetStatus::parse) {
                Some(from) => Err(StoreError::InvalidTransition { bet_id, from, to }),
                None => Err(StoreError::Backend(format!("unexpected script result '{}'", other))),
            },
        }
    }
}

fn bet_to_fields(bet: &Bet) -> Vec<(&'static str, String)> {
    vec![
        ("bet_id", bet.bet_id.to_string()),
        ("user_id", bet.user_id.to_string()),
        ("event_id", bet.event_id.to_string()),
        ("side_reference", if bet.side.reference { "1" } else { "0" }.to_string()),
        ("side_label", bet.side.label.clone()),
        ("amount", bet.amount.to_string()),
        ("coin_kind", bet.coin_kind.as_str().to_string()),
        ("initial_spread", bet.initial_spread.to_string()),
        ("current_spread", bet.current_spread.to_string()),
        ("matched_amount", bet.matched_amount.to_string()),
        ("status", bet.status.as_str().to_string()),
        ("created_at", timestamp(bet.created_at)),
        ("updated_at", timestamp(bet.updated_at)),
    ]
}

fn bet_from_fields(fields: HashMap<String, String>) -> StoreResult<Bet> {
    fn field<'a>(fields: &'a HashMap<String, String>, name: &str) -> StoreResult<&'a str> {
        fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| StoreError::Serialization(format!("bet hash missing field '{}'", name)))
    }
    fn parsed<T: std::str::FromStr>(fields: &HashMap<String, String>, name: &str) -> StoreResult<T> {
        field(fields, name)?
            .parse()
            .map_err(|_| StoreError::Serialization(format!("bet hash has malformed '{}'", name)))
    }
    fn time(fields: &HashMap<String, String>, name: &str) -> StoreResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(field(fields, name)?)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StoreError::Serialization(format!("bet hash '{}': {}", name, e)))
    }

    let status = field(&fields, "status")?;
    let coin_kind = field(&fields, "coin_kind")?;

    Ok(Bet {
        bet_id: parsed(&fields, "bet_id")?,
        user_id: UserId::new(field(&fields, "user_id")?),
        event_id: EventId::new(field(&fields, "event_id")?),
        side: BetSide::new(field(&fields, "side_reference")? == "1", field(&fields, "side_label")?),
        amount: parsed(&fields, "amount")?,
        coin_kind: CoinKind::parse(coin_kind)
            .ok_or_else(|| StoreError::Serialization(format!("unknown coin kind '{}'", coin_kind)))?,
        initial_spread: parsed(&fields, "initial_spread")?,
        current_spread: parsed(&fields, "current_spread")?,
        matched_amount: parsed(&fields, "matched_amount")?,
        status: BetStatus::parse(status)
            .ok_or_else(|| StoreError::Serialization(format!("unknown status '{}'", status)))?,
        created_at: time(&fields, "created_at")?,
        updated_at: time(&fields, "updated_at")?,
    })
}

#[async_trait]
impl BetStore for RedisBetStore {
    async fn insert_bet(&self, bet: &Bet) -> StoreResult<()> {
        let mut invocation = self.insert_bet.key(self.bet_key(bet.bet_id));
        invocation
            .key(self.event_index_key(&bet.event_id))
            .key(self.user_index_key(&bet.user_id))
            .key(self.all_bets_key())
            .arg(bet.bet_id.to_string());
        for (name, value) in bet_to_fields(bet) {
            invocation.arg(name).arg(value);
        }

        let mut conn = self.conn.clone();
        let outcome: String = invocation.invoke_async(&mut conn).await.map_err(map_redis_error)?;
        insert_outcome(bet.bet_id, &outcome)?;

        debug!(bet_id = %bet.bet_id, event_id = %bet.event_id, "Bet persisted to Redis");
        Ok(())
    }

    async fn get_bet(&self, bet_id: BetId) -> StoreResult<Bet> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> =
            conn.hgetall(self.bet_key(bet_id)).await.map_err(map_redis_error)?;
        if fields.is_empty() {
            return Err(StoreError::NotFound(bet_id));
        }
        bet_from_fields(fields)
    }

    async fn query_bets(&self, query: &BetQuery) -> StoreResult<Vec<Bet>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .smembers(self.index_key(query))
            .await
            .map_err(map_redis_error)?;

        let bets = self.load_bets(&ids).await?;
        Ok(bets.into_iter().filter(|b| query.matches(b)).collect())
    }

    async fn atomic_apply_match(&self, bet_a: &Bet, bet_b: &Bet, new_match: &Match) -> StoreResult<()> {
        let json = serde_json::to_string(new_match)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut conn = self.conn.clone();
        let outcome: String = self
            .apply_match
            .key(self.bet_key(bet_a.bet_id))
            .key(self.bet_key(bet_b.bet_id))
            .key(self.matches_key(bet_a.bet_id))
            .key(self.matches_key(bet_b.bet_id))
            .arg(bet_a.matched_amount)
            .arg(bet_b.matched_amount)
            .arg(new_match.amount)
            .arg(json)
            .arg(timestamp(new_match.created_at))
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        match outcome.as_str() {
            "ok" => Ok(()),
            "missing:a" => Err(StoreError::NotFound(bet_a.bet_id)),
            "missing:b" => Err(StoreError::NotFound(bet_b.bet_id)),
            "conflict" => Err(StoreError::Conflict(format!(
                "bets {} / {} changed concurrently",
                bet_a.bet_id, bet_b.bet_id
            ))),
            other => Err(StoreError::Backend(format!(
                "match {} rejected: {}",
                new_match.match_id, other
            ))),
        }
    }

    async fn update_status(&self, bet_id: BetId, new_status: BetStatus) -> StoreResult<Bet> {
        let mut invocation = self.update_status.key(self.bet_key(bet_id));
        invocation.arg(new_status.as_str()).arg(timestamp(Utc::now()));
        for from in new_status.predecessors() {
            invocation.arg(from.as_str());
        }

        let mut conn = self.conn.clone();
        let outcome: String = invocation.invoke_async(&mut conn).await.map_err(map_redis_error)?;
        self.script_outcome(bet_id, new_status, &outcome)?;
        self.get_bet(bet_id).await
    }

    async fn cancel_bet(&self, bet_id: BetId, expected_matched: u32) -> StoreResult<Bet> {
        let mut conn = self.conn.clone();
        let outcome: String = self
            .cancel
            .key(self.bet_key(bet_id))
            .arg(expected_matched)
            .arg(timestamp(Utc::now()))
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        self.script_outcome(bet_id, BetStatus::Cancelled, &outcome)?;
        self.get_bet(bet_id).await
    }

    async fn update_current_spread(&self, bet_id: BetId, spread: f64) -> StoreResult<Bet> {
        let mut conn = self.conn.clone();
        let outcome: String = self
            .update_spread
            .key(self.bet_key(bet_id))
            .arg(spread.to_string())
            .arg(timestamp(Utc::now()))
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        if outcome == "missing" {
            return Err(StoreError::NotFound(bet_id));
        }
        self.get_bet(bet_id).await
    }

    async fn matches_for_bet(&self, bet_id: BetId) -> StoreResult<Vec<Match>> {
        self.read_list(self.matches_key(bet_id)).await
    }

    async fn record_refund(&self, refund: &Refund) -> StoreResult<()> {
        let json =
            serde_json::to_string(refund).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(self.refunds_key(refund.bet_id), json)
            .await
            .map_err(map_redis_error)
    }

    async fn refunds_for_bet(&self, bet_id: BetId) -> StoreResult<Vec<Refund>> {
        self.read_list(self.refunds_key(bet_id)).await
    }

    async fn lock_event(&self, event_id: &EventId) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(self.locked_events_key(), event_id.as_str())
            .await
            .map_err(map_redis_error)
    }

    async fn unlock_event(&self, event_id: &EventId) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(self.locked_events_key(), event_id.as_str())
            .await
            .map_err(map_redis_error)
    }

    async fn is_event_locked(&self, event_id: &EventId) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        conn.sismember(self.locked_events_key(), event_id.as_str())
            .await
            .map_err(map_redis_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewBet;

    #[test]
    fn test_bet_hash_round_trip_preserves_fields() {
        let mut bet = NewBet {
            user_id: UserId::new("alice"),
            event_id: EventId::new("game-7"),
            side: BetSide::new(false, "Away"),
            amount: 40,
            coin_kind: CoinKind::Stakes,
            spread: -3.5,
        }
        .into_bet(Utc::now());
        bet.matched_amount = 15;
        bet.status = BetStatus::PartiallyMatched;
        bet.current_spread = -4.25;

        let fields: HashMap<String, String> = bet_to_fields(&bet)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let decoded = bet_from_fields(fields).unwrap();

        assert_eq!(decoded.bet_id, bet.bet_id);
        assert_eq!(decoded.side, bet.side);
        assert_eq!(decoded.status, BetStatus::PartiallyMatched);
        assert_eq!(decoded.remaining_amount(), 25);
        assert_eq!(decoded.current_spread, -4.25);
        assert_eq!(decoded.created_at, bet.created_at);
        assert_eq!(decoded.updated_at, bet.updated_at);
    }

    #[test]
    fn test_timestamps_keep_nanoseconds() {
        let at = DateTime::parse_from_rfc3339("2026-03-01T12:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(timestamp(at), "2026-03-01T12:00:00.123456789Z");
    }

    #[test]
    fn test_insert_outcomes() {
        let bet_id = BetId::new();
        assert!(insert_outcome(bet_id, "ok").is_ok());
        assert!(matches!(
            insert_outcome(bet_id, "exists"),
            Err(StoreError::AlreadyExists(id)) if id == bet_id
        ));
        assert!(matches!(insert_outcome(bet_id, "???"), Err(StoreError::Backend(_))));
    }

    #[test]
    fn test_missing_field_is_serialization_error() {
        let fields = HashMap::from([("bet_id".to_string(), BetId::new().to_string())]);
        assert!(matches!(bet_from_fields(fields), Err(StoreError::Serialization(_))));
    }
}
