//! SQL Server bulk insert over the TDS bulk load protocol.

use async_trait::async_trait;
use chrono::Timelike;
use tiberius::{ColumnData, TokenRow};
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncWriteCompatExt;
use tracing::{debug, info, warn};

use crate::error::{BulkCopyError, Result};
use crate::flatten::RowCursor;
use crate::options::BulkCopyOptions;
use crate::providers::{BulkInsertProvider, BulkTransaction, MssqlClient};
use crate::value::{SqlType, SqlValue};

/// Bulk inserts into SQL Server using tiberius' bulk load channel.
///
/// Owned runs bracket the load in an explicit `BEGIN TRANSACTION` /
/// `COMMIT` pair on a fresh connection. With keep-identity the load is
/// additionally bracketed in `SET IDENTITY_INSERT ON/OFF`.
pub struct MssqlBulkProvider {
    conn_string: String,
}

impl MssqlBulkProvider {
    /// `conn_string` is an ADO.NET-style connection string
    /// (`server=tcp:...;user=...;password=...`).
    pub fn new(conn_string: impl Into<String>) -> Self {
        Self {
            conn_string: conn_string.into(),
        }
    }

    async fn connect(&self) -> Result<MssqlClient> {
        let config = tiberius::Config::from_ado_string(&self.conn_string)?;
        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        Ok(tiberius::Client::connect(config, tcp.compat_write()).await?)
    }
}

#[async_trait]
impl BulkInsertProvider for MssqlBulkProvider {
    fn connection_kind(&self) -> &str {
        "mssql"
    }

    async fn run(
        &self,
        cursor: &mut dyn RowCursor,
        options: BulkCopyOptions,
        _batch_size: usize,
    ) -> Result<u64> {
        let mut client = self.connect().await?;
        client.execute("BEGIN TRANSACTION", &[]).await?;
        match send_rows(&mut client, &mut *cursor, options).await {
            Ok(rows) => {
                client.execute("COMMIT TRANSACTION", &[]).await?;
                info!(table = cursor.table(), rows, "bulk load committed");
                Ok(rows)
            }
            Err(e) => {
                if let Err(rb) = client.execute("ROLLBACK TRANSACTION", &[]).await {
                    warn!("rollback after failed bulk load also failed: {}", rb);
                }
                Err(e)
            }
        }
    }

    async fn run_in(
        &self,
        transaction: &mut BulkTransaction<'_>,
        cursor: &mut dyn RowCursor,
        options: BulkCopyOptions,
        _batch_size: usize,
    ) -> Result<u64> {
        match transaction {
            BulkTransaction::Mssql(client) => send_rows(client, cursor, options).await,
            BulkTransaction::Postgres(_) => Err(BulkCopyError::Config(
                "Transaction does not belong to the mssql provider".to_string(),
            )),
        }
    }
}

/// Stream every cursor row through a single bulk load request.
async fn send_rows(
    client: &mut MssqlClient,
    cursor: &mut dyn RowCursor,
    options: BulkCopyOptions,
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

    let table = format!(
        "{}.{}",
        quote_ident(cursor.schema()),
        quote_ident(cursor.table())
    );

    if options.keep_identity() {
        client
            .execute(identity_insert_sql(&table, true), &[])
            .await?;
    }

    let result = stream_rows(client, &mut *cursor, &table, &ordinals).await;

    // IDENTITY_INSERT is session state: SQL Server allows it ON for one
    // table per session and rollback does not reset it, so a joined
    // caller's connection must be restored on every exit path.
    if options.keep_identity() {
        if let Err(off_err) = client
            .execute(identity_insert_sql(&table, false), &[])
            .await
        {
            if result.is_ok() {
                return Err(off_err.into());
            }
            warn!(
                "resetting IDENTITY_INSERT after failed bulk load also failed: {}",
                off_err
            );
        }
    }

    result
}

async fn stream_rows(
    client: &mut MssqlClient,
    cursor: &mut dyn RowCursor,
    table: &str,
    ordinals: &[usize],
) -> Result<u64> {
    debug!(table = %table, columns = ordinals.len(), "starting bulk load");
    let mut request = client
        .bulk_insert(table)
        .await
        .map_err(|e| BulkCopyError::load(table, format!("bulk load init: {}", e)))?;
    let mut rows = 0u64;
    while cursor.advance() {
        let mut row = TokenRow::new();
        for &i in ordinals {
            row.push(sql_value_to_column_data(cursor.value(i)));
        }
        request
            .send(row)
            .await
            .map_err(|e| BulkCopyError::load(table, format!("bulk load send: {}", e)))?;
        rows += 1;
    }
    request
        .finalize()
        .await
        .map_err(|e| BulkCopyError::load(table, format!("bulk load finalize: {}", e)))?;
    Ok(rows)
}

fn identity_insert_sql(table: &str, enable: bool) -> String {
    format!(
        "SET IDENTITY_INSERT {} {}",
        table,
        if enable { "ON" } else { "OFF" }
    )
}

/// Quote a SQL Server identifier.
fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Convert a flattened value to tiberius column data.
///
/// NULLs carry their column type so the TDS writer picks the right wire
/// encoding; non-finite floats have no SQL representation and degrade to
/// NULL.
fn sql_value_to_column_data(value: SqlValue<'static>) -> ColumnData<'static> {
    match value {
        SqlValue::Null(t) => match t {
            SqlType::Bool => ColumnData::Bit(None),
            SqlType::I16 => ColumnData::I16(None),
            SqlType::I32 => ColumnData::I32(None),
            SqlType::I64 => ColumnData::I64(None),
            SqlType::F32 => ColumnData::F32(None),
            SqlType::F64 => ColumnData::F64(None),
            SqlType::Text => ColumnData::String(None),
            SqlType::Bytes => ColumnData::Binary(None),
            SqlType::Uuid => ColumnData::Guid(None),
            SqlType::Decimal => ColumnData::Numeric(None),
            SqlType::DateTime | SqlType::Date => ColumnData::DateTime2(None),
            SqlType::DateTimeOffset => ColumnData::DateTimeOffset(None),
            SqlType::Time => ColumnData::Time(None),
        },
        SqlValue::Bool(b) => ColumnData::Bit(Some(b)),
        SqlValue::I16(i) => ColumnData::I16(Some(i)),
        SqlValue::I32(i) => ColumnData::I32(Some(i)),
        SqlValue::I64(i) => ColumnData::I64(Some(i)),
        SqlValue::F32(f) => {
            if f.is_finite() {
                ColumnData::F32(Some(f))
            } else {
                ColumnData::F32(None)
            }
        }
        SqlValue::F64(f) => {
            if f.is_finite() {
                ColumnData::F64(Some(f))
            } else {
                ColumnData::F64(None)
            }
        }
        SqlValue::Text(s) => ColumnData::String(Some(s)),
        SqlValue::Bytes(b) => ColumnData::Binary(Some(b)),
        SqlValue::Uuid(u) => ColumnData::Guid(Some(u)),
        SqlValue::Decimal(d) => {
            let scale = d.scale() as u8;
            let mantissa = d.mantissa();
            ColumnData::Numeric(Some(tiberius::numeric::Numeric::new_with_scale(
                mantissa, scale,
            )))
        }
        SqlValue::DateTime(dt) => ColumnData::DateTime2(naive_to_datetime2(dt)),
        SqlValue::DateTimeOffset(dto) => {
            let naive = dto.naive_utc();
            match naive_to_datetime2(naive) {
                Some(dt2) => {
                    let offset_minutes = (dto.offset().local_minus_utc() / 60) as i16;
                    ColumnData::DateTimeOffset(Some(tiberius::time::DateTimeOffset::new(
                        dt2,
                        offset_minutes,
                    )))
                }
                None => ColumnData::DateTimeOffset(None),
            }
        }
        SqlValue::Date(d) => ColumnData::DateTime2(naive_to_datetime2(
            d.and_hms_opt(0, 0, 0).unwrap_or_default(),
        )),
        SqlValue::Time(t) => {
            let nanos =
                t.num_seconds_from_midnight() as u64 * 1_000_000_000 + t.nanosecond() as u64;
            ColumnData::Time(Some(tiberius::time::Time::new(nanos / 100, 7)))
        }
    }
}

/// Convert a chrono timestamp to a TDS datetime2 (days since year 1,
/// 100ns increments since midnight). Out-of-range dates become NULL.
fn naive_to_datetime2(dt: chrono::NaiveDateTime) -> Option<tiberius::time::DateTime2> {
    let epoch = chrono::NaiveDate::from_ymd_opt(1, 1, 1)?;
    let days = (dt.date() - epoch).num_days();
    if days < 0 || days > u32::MAX as i64 {
        return None;
    }
    let date = tiberius::time::Date::new(days as u32);
    let time = dt.time();
    let nanos =
        time.num_seconds_from_midnight() as u64 * 1_000_000_000 + time.nanosecond() as u64;
    let time = tiberius::time::Time::new(nanos / 100, 7);
    Some(tiberius::time::DateTime2::new(date, time))
}
