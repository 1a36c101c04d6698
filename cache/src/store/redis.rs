//! Redis-backed coordination store.
//!
//! Each compound transition is a Lua script, so Redis executes it atomically
//! with respect to every other client sharing the namespace. Requires the
//! `redis` feature.

use super::{CoordinationStore, Evicted, GetOutcome, KeyLayout, PutOutcome, Segment, StoredEntry};
use crate::error::{Error, Result};

use parking_lot::Mutex;
use redis::{Client, Connection, Script, ScriptInvocation};

/// Shared prelude: reads the weight out of an encoded `value` or `value|weight`.
const WEIGHT_OF: &str = r#"
local function weight_of(raw)
  local sep = string.find(raw, '|', 1, true)
  if sep then
    return tonumber(string.sub(raw, sep + 1))
  end
  return tonumber(raw)
end
"#;

/// The largest weight, and total, Lua numbers hold exactly.
const MAX_SCRIPT_WEIGHT: u64 = (1 << 53) - 1;

/// KEYS: protected lru, values, weight; probation lru, values, weight; total.
/// ARGV: score, key, encoded entry, weight, weight limit.
const SCRIPT_PUT: &str = r#"
local z1, h1, w1 = KEYS[1], KEYS[2], KEYS[3]
local z2, h2, w2 = KEYS[4], KEYS[5], KEYS[6]
local w = KEYS[7]
local s, k, v, vw = ARGV[1], ARGV[2], ARGV[3], tonumber(ARGV[4])

local old = redis.call('HGET', h1, k)
local held = old or redis.call('HGET', h2, k)
local room = tonumber(ARGV[5]) - tonumber(redis.call('GET', w) or '0')
if held then
  room = room + weight_of(held)
end
if vw > room then
  return {'overflow', string.format('%.0f', room)}
end

if old then
  local delta = vw - weight_of(old)
  redis.call('HSET', h1, k, v)
  redis.call('INCRBY', w1, delta)
  redis.call('INCRBY', w, delta)
  return {'updated', old}
end

old = redis.call('HGET', h2, k)
if old then
  local ow = weight_of(old)
  redis.call('ZREM', z2, k)
  redis.call('HDEL', h2, k)
  redis.call('DECRBY', w2, ow)
  redis.call('ZADD', z1, s, k)
  redis.call('HSET', h1, k, v)
  redis.call('INCRBY', w1, vw)
  redis.call('INCRBY', w, vw - ow)
  return {'promoted', old}
end

redis.call('ZADD', z2, s, k)
redis.call('HSET', h2, k, v)
redis.call('INCRBY', w2, vw)
redis.call('INCRBY', w, vw)
return {'inserted'}
"#;

/// KEYS: protected lru, values, weight; probation lru, values, weight.
/// ARGV: score, key.
const SCRIPT_GET: &str = r#"
local z1, h1, w1 = KEYS[1], KEYS[2], KEYS[3]
local z2, h2, w2 = KEYS[4], KEYS[5], KEYS[6]
local s, k = ARGV[1], ARGV[2]

local v = redis.call('HGET', h1, k)
if v then
  return {'hit', v}
end

v = redis.call('HGET', h2, k)
if v then
  local vw = weight_of(v)
  redis.call('ZREM', z2, k)
  redis.call('HDEL', h2, k)
  redis.call('DECRBY', w2, vw)
  redis.call('ZADD', z1, s, k)
  redis.call('HSET', h1, k, v)
  redis.call('INCRBY', w1, vw)
  return {'promoted', v}
end

return nil
"#;

/// KEYS: protected lru, values, weight; probation lru, values, weight; total.
/// ARGV: key.
const SCRIPT_REMOVE: &str = r#"
local k = ARGV[1]
local segments = {
  {'protected', KEYS[1], KEYS[2], KEYS[3]},
  {'probation', KEYS[4], KEYS[5], KEYS[6]},
}
for _, seg in ipairs(segments) do
  local v = redis.call('HGET', seg[3], k)
  if v then
    local vw = weight_of(v)
    redis.call('ZREM', seg[2], k)
    redis.call('HDEL', seg[3], k)
    redis.call('DECRBY', seg[4], vw)
    redis.call('DECRBY', KEYS[7], vw)
    return {seg[1], v}
  end
end
return nil
"#;

/// KEYS: probation lru, values, weight; protected lru, values, weight; total.
const SCRIPT_EVICT: &str = r#"
local segments = {
  {'probation', KEYS[1], KEYS[2], KEYS[3]},
  {'protected', KEYS[4], KEYS[5], KEYS[6]},
}
for _, seg in ipairs(segments) do
  local keys = redis.call('ZRANGE', seg[2], 0, 0)
  if keys[1] then
    local k = keys[1]
    redis.call('ZREM', seg[2], k)
    local v = redis.call('HGET', seg[3], k)
    if not v then
      return nil
    end
    local vw = weight_of(v)
    redis.call('HDEL', seg[3], k)
    redis.call('DECRBY', seg[4], vw)
    redis.call('DECRBY', KEYS[7], vw)
    return {seg[1], k, v}
  end
end
return nil
"#;

/// KEYS: protected lru, values, weight; probation lru, values, weight.
/// ARGV: score.
const SCRIPT_DEMOTE: &str = r#"
local z1, h1, w1 = KEYS[1], KEYS[2], KEYS[3]
local z2, h2, w2 = KEYS[4], KEYS[5], KEYS[6]
local keys = redis.call('ZRANGE', z1, 0, 0)
if keys[1] then
  local k = keys[1]
  redis.call('ZREM', z1, k)
  local v = redis.call('HGET', h1, k)
  if not v then
    return nil
  end
  local vw = weight_of(v)
  redis.call('HDEL', h1, k)
  redis.call('DECRBY', w1, vw)
  redis.call('ZADD', z2, ARGV[1], k)
  redis.call('HSET', h2, k, v)
  redis.call('INCRBY', w2, vw)
  return {k, v}
end
return nil
"#;

struct Scripts {
  put: Script,
  get: Script,
  remove: Script,
  evict: Script,
  demote: Script,
}

impl Scripts {
  fn load() -> Self {
    let with_prelude = |body: &str| Script::new(&format!("{WEIGHT_OF}{body}"));
    Self {
      put: with_prelude(SCRIPT_PUT),
      get: with_prelude(SCRIPT_GET),
      remove: with_prelude(SCRIPT_REMOVE),
      evict: with_prelude(SCRIPT_EVICT),
      demote: with_prelude(SCRIPT_DEMOTE),
    }
  }
}

/// A coordination store backed by a single Redis connection.
pub struct RedisStore {
  conn: Mutex<Connection>,
  scripts: Scripts,
}

impl RedisStore {
  /// Connects to the Redis instance at `url` (e.g. `redis://127.0.0.1:6379`).
  pub fn open(url: &str) -> Result<Self> {
    let client = Client::open(url)?;
    let conn = client.get_connection()?;
    tracing::info!(url = url, "Connected SLRU coordination store to redis");
    Ok(Self::with_connection(conn))
  }

  pub fn with_connection(conn: Connection) -> Self {
    Self {
      conn: Mutex::new(conn),
      scripts: Scripts::load(),
    }
  }

  fn decode(key: &str, raw: &str) -> Result<StoredEntry> {
    StoredEntry::decode(raw).ok_or_else(|| Error::Corrupt {
      key: key.to_string(),
      raw: raw.to_string(),
    })
  }

  fn segment(raw: &str) -> Result<Segment> {
    Segment::parse(raw).ok_or_else(|| Error::Store(format!("unknown segment '{raw}' in script reply")))
  }
}

impl std::fmt::Debug for RedisStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RedisStore").finish_non_exhaustive()
  }
}

/// Pushes a segment's sorted set, hash and weight counter as script KEYS.
fn push_segment(invocation: &mut ScriptInvocation<'_>, layout: &KeyLayout, segment: Segment) {
  invocation
    .key(layout.lru(segment))
    .key(layout.values(segment))
    .key(layout.weight(segment));
}

impl CoordinationStore for RedisStore {
  fn put(&self, layout: &KeyLayout, key: &str, entry: StoredEntry, score: f64) -> Result<PutOutcome> {
    entry.checked_weight(key, MAX_SCRIPT_WEIGHT)?;
    let mut invocation = self.scripts.put.prepare_invoke();
    push_segment(&mut invocation, layout, Segment::Protected);
    push_segment(&mut invocation, layout, Segment::Probation);
    invocation
      .key(layout.total_weight())
      .arg(score)
      .arg(key)
      .arg(entry.encode())
      .arg(entry.weight)
      .arg(MAX_SCRIPT_WEIGHT);
    let reply: Vec<String> = invocation.invoke(&mut *self.conn.lock())?;

    match reply.as_slice() {
      [status] if status == "inserted" => Ok(PutOutcome::Inserted),
      [status, old] if status == "promoted" => Ok(PutOutcome::Promoted(Self::decode(key, old)?)),
      [status, old] if status == "updated" => Ok(PutOutcome::Updated(Self::decode(key, old)?)),
      [status, room] if status == "overflow" => Err(Error::WeightOverflow {
        key: key.to_string(),
        weight: entry.weight,
        max: room.parse::<i64>().map_or(0, |room| room.max(0) as u64),
      }),
      other => Err(Error::Store(format!("unexpected put reply {other:?}"))),
    }
  }

  fn get(&self, layout: &KeyLayout, key: &str, score: f64) -> Result<Option<GetOutcome>> {
    let mut invocation = self.scripts.get.prepare_invoke();
    push_segment(&mut invocation, layout, Segment::Protected);
    push_segment(&mut invocation, layout, Segment::Probation);
    invocation
      .arg(score)
      .arg(key);
    let reply: Option<Vec<String>> = invocation.invoke(&mut *self.conn.lock())?;

    match reply.as_deref() {
      None => Ok(None),
      Some([status, raw]) if status == "hit" => Ok(Some(GetOutcome::Hit(Self::decode(key, raw)?))),
      Some([status, raw]) if status == "promoted" => {
        Ok(Some(GetOutcome::Promoted(Self::decode(key, raw)?)))
      }
      Some(other) => Err(Error::Store(format!("unexpected get reply {other:?}"))),
    }
  }

  fn remove(&self, layout: &KeyLayout, key: &str) -> Result<Option<(Segment, StoredEntry)>> {
    let mut invocation = self.scripts.remove.prepare_invoke();
    push_segment(&mut invocation, layout, Segment::Protected);
    push_segment(&mut invocation, layout, Segment::Probation);
    invocation
      .key(layout.total_weight())
      .arg(key);
    let reply: Option<Vec<String>> = invocation.invoke(&mut *self.conn.lock())?;

    match reply.as_deref() {
      None => Ok(None),
      Some([segment, raw]) => Ok(Some((Self::segment(segment)?, Self::decode(key, raw)?))),
      Some(other) => Err(Error::Store(format!("unexpected remove reply {other:?}"))),
    }
  }

  fn evict_eldest(&self, layout: &KeyLayout) -> Result<Option<Evicted>> {
    let mut invocation = self.scripts.evict.prepare_invoke();
    push_segment(&mut invocation, layout, Segment::Probation);
    push_segment(&mut invocation, layout, Segment::Protected);
    invocation
      .key(layout.total_weight());
    let reply: Option<Vec<String>> = invocation.invoke(&mut *self.conn.lock())?;

    match reply.as_deref() {
      None => Ok(None),
      Some([segment, key, raw]) => Ok(Some(Evicted {
        segment: Self::segment(segment)?,
        entry: Self::decode(key, raw)?,
        key: key.clone(),
      })),
      Some(other) => Err(Error::Store(format!("unexpected evict reply {other:?}"))),
    }
  }

  fn demote_eldest(&self, layout: &KeyLayout, score: f64) -> Result<Option<(String, StoredEntry)>> {
    let mut invocation = self.scripts.demote.prepare_invoke();
    push_segment(&mut invocation, layout, Segment::Protected);
    push_segment(&mut invocation, layout, Segment::Probation);
    invocation
      .arg(score);
    let reply: Option<Vec<String>> = invocation.invoke(&mut *self.conn.lock())?;

    match reply.as_deref() {
      None => Ok(None),
      Some([key, raw]) => Ok(Some((key.clone(), Self::decode(key, raw)?))),
      Some(other) => Err(Error::Store(format!("unexpected demote reply {other:?}"))),
    }
  }

  fn segment_of(&self, layout: &KeyLayout, key: &str) -> Result<Option<Segment>> {
    let mut conn = self.conn.lock();
    for segment in [Segment::Protected, Segment::Probation] {
      let exists: bool = redis::cmd("HEXISTS")
        .arg(layout.values(segment))
        .arg(key)
        .query(&mut *conn)?;
      if exists {
        return Ok(Some(segment));
      }
    }
    Ok(None)
  }

  fn eldest(&self, layout: &KeyLayout, segment: Segment) -> Result<Option<String>> {
    let first: Vec<String> = redis::cmd("ZRANGE")
      .arg(layout.lru(segment))
      .arg(0)
      .arg(0)
      .query(&mut *self.conn.lock())?;
    Ok(first.into_iter().next())
  }

  fn keys(&self, layout: &KeyLayout, segment: Segment) -> Result<Vec<String>> {
    Ok(
      redis::cmd("ZRANGE")
        .arg(layout.lru(segment))
        .arg(0)
        .arg(-1)
        .query(&mut *self.conn.lock())?,
    )
  }

  fn len(&self, layout: &KeyLayout, segment: Segment) -> Result<u64> {
    Ok(
      redis::cmd("HLEN")
        .arg(layout.values(segment))
        .query(&mut *self.conn.lock())?,
    )
  }

  fn counter(&self, counter: &str) -> Result<i64> {
    let value: Option<i64> = redis::cmd("GET").arg(counter).query(&mut *self.conn.lock())?;
    Ok(value.unwrap_or(0))
  }
}
