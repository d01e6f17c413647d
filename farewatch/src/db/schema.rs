use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Owners
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS owners (
  owner_id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  utc_offset_minutes BIGINT NOT NULL DEFAULT 0,
  cooldown_minutes BIGINT NOT NULL,
  quiet_enabled INTEGER NOT NULL CHECK (quiet_enabled IN (0,1)),
  quiet_start TEXT NOT NULL,
  quiet_end TEXT NOT NULL,
  daily_alert_cap BIGINT NOT NULL,
  daily_alert_count BIGINT NOT NULL DEFAULT 0,
  daily_alert_count_date TEXT,
  watch_limit BIGINT NOT NULL,
  active_watch_count BIGINT NOT NULL DEFAULT 0,
  alerts_received BIGINT NOT NULL DEFAULT 0,
  best_deal_amount REAL,
  best_deal_currency TEXT,
  best_deal_route TEXT,
  best_deal_found_ms BIGINT
);
"#,
    )
    .execute(pool)
    .await?;

    // Watches. Price columns carry named CHECK constraints so a violation
    // reports the offending field.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS watches (
  watch_id TEXT PRIMARY KEY,
  owner_id TEXT NOT NULL,
  name TEXT NOT NULL,
  origin TEXT NOT NULL,
  destination TEXT NOT NULL,
  flight_type TEXT NOT NULL CHECK (flight_type IN ('oneway','roundtrip')),
  out_start TEXT NOT NULL,
  out_end TEXT NOT NULL,
  out_flexible INTEGER NOT NULL CHECK (out_flexible IN (0,1)),
  in_start TEXT,
  in_end TEXT,
  in_flexible INTEGER,
  price_threshold REAL NOT NULL CONSTRAINT price_threshold CHECK (price_threshold > 0),
  currency TEXT NOT NULL,
  max_stops BIGINT,
  passengers BIGINT NOT NULL,
  is_active INTEGER NOT NULL CHECK (is_active IN (0,1)),
  check_interval_minutes BIGINT NOT NULL CHECK (check_interval_minutes >= 15),
  last_checked_ms BIGINT,
  best_price_amount REAL CONSTRAINT best_price_amount
    CHECK (best_price_amount IS NULL OR (best_price_amount > 0 AND best_price_amount < 10000)),
  best_price_currency TEXT,
  best_price_offer_ref TEXT,
  best_price_found_ms BIGINT,
  notify_enabled INTEGER NOT NULL CHECK (notify_enabled IN (0,1)),
  only_new_lows INTEGER NOT NULL CHECK (only_new_lows IN (0,1)),
  cooldown_minutes BIGINT,
  last_sent_ms BIGINT,
  total_checks BIGINT NOT NULL DEFAULT 0,
  alerts_sent BIGINT NOT NULL DEFAULT 0,
  stats_average_price REAL CONSTRAINT stats_average_price
    CHECK (stats_average_price IS NULL OR (stats_average_price > 0 AND stats_average_price < 10000)),
  stats_lowest_price REAL CONSTRAINT stats_lowest_price
    CHECK (stats_lowest_price IS NULL OR (stats_lowest_price > 0 AND stats_lowest_price < 10000)),
  stats_highest_price REAL CONSTRAINT stats_highest_price
    CHECK (stats_highest_price IS NULL OR (stats_highest_price > 0 AND stats_highest_price < 10000))
);
"#,
    )
    .execute(pool)
    .await?;

    // Offers (write-once by provider id)
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS offers (
  offer_id TEXT PRIMARY KEY,
  origin TEXT NOT NULL,
  destination TEXT NOT NULL,
  departure_ms BIGINT NOT NULL,
  arrival_ms BIGINT NOT NULL,
  price_amount REAL NOT NULL,
  currency TEXT NOT NULL,
  is_direct INTEGER NOT NULL,
  number_of_stops BIGINT NOT NULL,
  stops_json TEXT NOT NULL,
  airline TEXT,
  booking_url TEXT,
  query_json TEXT NOT NULL,
  found_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_watches_due ON watches(is_active, last_checked_ms);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_watches_owner ON watches(owner_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_offers_route ON offers(origin, destination, departure_ms);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
