//! PostgreSQL bulk insert over binary COPY.

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use chrono::Timelike;
use futures::SinkExt;
use tokio_postgres::{NoTls, Transaction};
use tracing::{debug, info, warn};

use crate::error::{BulkCopyError, Result};
use crate::flatten::RowCursor;
use crate::options::BulkCopyOptions;
use crate::providers::{BulkInsertProvider, BulkTransaction};
use crate::value::SqlValue;

/// Bulk inserts into PostgreSQL using `COPY ... FROM STDIN (FORMAT BINARY)`.
///
/// Each owned run opens a fresh connection; there is no pooling. Rows are
/// encoded into the PGCOPY binary format and flushed to the sink every
/// `batch_size` rows.
pub struct PgBulkProvider {
    conn_string: String,
}

impl PgBulkProvider {
    /// `conn_string` is a libpq-style connection string
    /// (`host=... user=... dbname=...`).
    pub fn new(conn_string: impl Into<String>) -> Self {
        Self {
            conn_string: conn_string.into(),
        }
    }
}

#[async_trait]
impl BulkInsertProvider for PgBulkProvider {
    fn connection_kind(&self) -> &str {
        "postgres"
    }

    async fn run(
        &self,
        cursor: &mut dyn RowCursor,
        _options: BulkCopyOptions,
        batch_size: usize,
    ) -> Result<u64> {
        let (mut client, connection) = tokio_postgres::connect(&self.conn_string, NoTls).await?;
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("postgres connection error: {}", e);
            }
        });

        let transaction = client.transaction().await?;
        let result = copy_rows(&transaction, &mut *cursor, batch_size).await;
        let outcome = match result {
            Ok(rows) => {
                transaction.commit().await?;
                info!(table = cursor.table(), rows, "bulk copy committed");
                Ok(rows)
            }
            Err(e) => {
                // Dropping the transaction rolls back; do it explicitly so
                // a rollback failure is not silently conflated with `e`.
                if let Err(rb) = transaction.rollback().await {
                    warn!("rollback after failed bulk copy also failed: {}", rb);
                }
                Err(e)
            }
        };
        drop(client);
        let _ = driver.await;
        outcome
    }

    async fn run_in(
        &self,
        transaction: &mut BulkTransaction<'_>,
        cursor: &mut dyn RowCursor,
        _options: BulkCopyOptions,
        batch_size: usize,
    ) -> Result<u64> {
        match transaction {
            BulkTransaction::Postgres(txn) => copy_rows(txn, cursor, batch_size).await,
            BulkTransaction::Mssql(_) => Err(BulkCopyError::Config(
                "Transaction does not belong to the postgres provider".to_string(),
            )),
        }
    }
}

/// Stream every cursor row into the transaction via binary COPY.
async fn copy_rows(
    transaction: &Transaction<'_>,
    cursor: &mut dyn RowCursor,
    batch_size: usize,
) -> Result<u64> {
    let bindings = cursor.column_mappings().to_vec();
    if bindings.is_empty() {
        return Err(BulkCopyError::Config(format!(
            "No writable columns for table {}.{}",
            cursor.schema(),
            cursor.table()
        )));
    }
    let ordinals: Vec<usize> = bindings
        .iter()
        .map(|b| {
            cursor.ordinal(&b.source).ok_or_else(|| {
                BulkCopyError::Config(format!("Unknown source column '{}'", b.source))
            })
        })
        .collect::<Result<_>>()?;

    let qualified = format!("{}.{}", cursor.schema(), cursor.table());
    let column_list: Vec<String> = bindings
        .iter()
        .map(|b| quote_ident(&b.destination))
        .collect();
    let copy_sql = format!(
        "COPY {}.{} ({}) FROM STDIN WITH (FORMAT BINARY)",
        quote_ident(cursor.schema()),
        quote_ident(cursor.table()),
        column_list.join(", ")
    );
    debug!(sql = %copy_sql, "starting binary COPY");

    let sink = transaction
        .copy_in(&copy_sql)
        .await
        .map_err(|e| BulkCopyError::load(&qualified, format!("initiating COPY: {}", e)))?;
    tokio::pin!(sink);

    let flush_every = batch_size.max(1);
    let mut buf = BytesMut::with_capacity(flush_every * 256);

    // PGCOPY header: signature + flags + extension area length.
    buf.put_slice(b"PGCOPY\n\xff\r\n\0");
    buf.put_i32(0);
    buf.put_i32(0);

    let mut rows = 0u64;
    let mut pending = 0usize;
    while cursor.advance() {
        buf.put_i16(ordinals.len() as i16);
        for &i in &ordinals {
            write_binary_value(&mut buf, &cursor.value(i));
        }
        rows += 1;
        pending += 1;
        if pending == flush_every {
            sink.send(buf.split().freeze())
                .await
                .map_err(|e| BulkCopyError::load(&qualified, format!("sending COPY data: {}", e)))?;
            pending = 0;
        }
    }

    // Trailer, then whatever is still buffered.
    buf.put_i16(-1);
    sink.send(buf.split().freeze())
        .await
        .map_err(|e| BulkCopyError::load(&qualified, format!("sending COPY data: {}", e)))?;
    sink.finish()
        .await
        .map_err(|e| BulkCopyError::load(&qualified, format!("finishing COPY: {}", e)))?;

    Ok(rows)
}

/// Quote a PostgreSQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Encode one value in PGCOPY binary format: i32 byte length (or -1 for
/// NULL) followed by the type's binary wire representation.
fn write_binary_value(buf: &mut BytesMut, value: &SqlValue<'_>) {
    match value {
        SqlValue::Null(_) => {
            buf.put_i32(-1);
        }
        SqlValue::Bool(b) => {
            buf.put_i32(1);
            buf.put_u8(u8::from(*b));
        }
        SqlValue::I16(i) => {
            buf.put_i32(2);
            buf.put_i16(*i);
        }
        SqlValue::I32(i) => {
            buf.put_i32(4);
            buf.put_i32(*i);
        }
        SqlValue::I64(i) => {
            buf.put_i32(8);
            buf.put_i64(*i);
        }
        SqlValue::F32(f) => {
            buf.put_i32(4);
            buf.put_f32(*f);
        }
        SqlValue::F64(f) => {
            buf.put_i32(8);
            buf.put_f64(*f);
        }
        SqlValue::Text(s) => {
            let bytes = s.as_bytes();
            buf.put_i32(bytes.len() as i32);
            buf.put_slice(bytes);
        }
        SqlValue::Bytes(b) => {
            buf.put_i32(b.len() as i32);
            buf.put_slice(b);
        }
        SqlValue::Uuid(u) => {
            buf.put_i32(16);
            buf.put_slice(u.as_bytes());
        }
        SqlValue::Decimal(d) => {
            encode_decimal_binary(buf, d);
        }
        SqlValue::DateTime(dt) => {
            // timestamp: microseconds since 2000-01-01.
            let epoch = pg_epoch();
            let micros = (*dt - epoch).num_microseconds().unwrap_or(0);
            buf.put_i32(8);
            buf.put_i64(micros);
        }
        SqlValue::DateTimeOffset(dto) => {
            let epoch = pg_epoch();
            let micros = (dto.naive_utc() - epoch).num_microseconds().unwrap_or(0);
            buf.put_i32(8);
            buf.put_i64(micros);
        }
        SqlValue::Date(d) => {
            // Days since 2000-01-01.
            let days = (*d - pg_epoch().date()).num_days() as i32;
            buf.put_i32(4);
            buf.put_i32(days);
        }
        SqlValue::Time(t) => {
            // Microseconds since midnight.
            let micros =
                t.num_seconds_from_midnight() as i64 * 1_000_000 + (t.nanosecond() / 1000) as i64;
            buf.put_i32(8);
            buf.put_i64(micros);
        }
    }
}

fn pg_epoch() -> chrono::NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Encode a Decimal into PostgreSQL binary NUMERIC format.
///
/// Layout: ndigits (i16), weight (i16), sign (i16, 0x0000 positive /
/// 0x4000 negative), dscale (i16), then base-10000 digits as i16s.
fn encode_decimal_binary(buf: &mut BytesMut, d: &rust_decimal::Decimal) {
    const NUMERIC_POS: i16 = 0x0000;
    const NUMERIC_NEG: i16 = 0x4000;

    if d.is_zero() {
        buf.put_i32(8);
        buf.put_i16(0); // ndigits
        buf.put_i16(0); // weight
        buf.put_i16(NUMERIC_POS);
        buf.put_i16(d.scale() as i16);
        return;
    }

    let sign = if d.is_sign_negative() {
        NUMERIC_NEG
    } else {
        NUMERIC_POS
    };
    let dscale = d.scale() as i16;

    // Work from the decimal string so digit grouping stays anchored at the
    // decimal point (0.01 has mantissa 1 but needs the "0001" group).
    let abs_str = d.abs().to_string();
    let (int_part, frac_part) = match abs_str.find('.') {
        Some(dot) => (&abs_str[..dot], &abs_str[dot + 1..]),
        None => (abs_str.as_str(), ""),
    };

    // Integer part groups right-to-left from the decimal point: pad left.
    let mut digits: Vec<i16> = Vec::new();
    let int_clean = int_part.trim_start_matches('0');
    if !int_clean.is_empty() {
        let padded_len = int_clean.len().div_ceil(4) * 4;
        let padded = format!("{:0>width$}", int_clean, width = padded_len);
        for chunk in padded.as_bytes().chunks(4) {
            digits.push(parse_group(chunk));
        }
    }
    let int_groups = digits.len() as i16;

    // Fractional part groups left-to-right: pad right.
    let mut frac_digits: Vec<i16> = Vec::new();
    if !frac_part.is_empty() {
        let mut padded = frac_part.to_string();
        while padded.len() % 4 != 0 {
            padded.push('0');
        }
        for chunk in padded.as_bytes().chunks(4) {
            frac_digits.push(parse_group(chunk));
        }
    }

    let weight = if int_groups > 0 {
        int_groups - 1
    } else {
        // All fractional: count leading zero groups to find the first
        // significant one (0.0001 -> weight -1, 0.00000001 -> -2).
        let leading_zero_groups = frac_digits.iter().take_while(|&&g| g == 0).count() as i16;
        -(leading_zero_groups + 1)
    };

    digits.extend(frac_digits);

    // Trailing zero groups carry no information.
    while digits.last() == Some(&0) {
        digits.pop();
    }
    // Leading zero groups only arise in the all-fractional case.
    let leading = digits.iter().take_while(|&&g| g == 0).count();
    digits.drain(..leading);

    buf.put_i32(8 + 2 * digits.len() as i32);
    buf.put_i16(digits.len() as i16);
    buf.put_i16(weight);
    buf.put_i16(sign);
    buf.put_i16(dscale);
    for digit in digits {
        buf.put_i16(digit);
    }
}

fn parse_group(chunk: &[u8]) -> i16 {
    std::str::from_utf8(chunk)
        .ok()
        .and_then(|s| s.parse::<i16>().ok())
        .unwrap_or(0)
}
