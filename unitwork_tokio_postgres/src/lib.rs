#![forbid(unsafe_code)]
#![cfg_attr(
    not(feature = "postgres-backend"),
    doc = "Enable feature `postgres-backend` to use this adapter."
)]

#[cfg(feature = "postgres-backend")]
mod backend {
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;
    use tokio_postgres::types::{ToSql, Type};
    use tokio_postgres::{Client, NoTls};
    use unitwork_core::{
        DbError, DbResult, ParamValue, QueryOutcome, Row, Session, SessionFactory, SessionId,
        Statement,
    };

    #[cfg(feature = "tracing")]
    use tracing::info;

    #[inline]
    #[allow(unused_variables)]
    fn obs_record(op: &str, session: SessionId, start: Instant, success: bool) {
        #[cfg(feature = "tracing")]
        {
            info!(
                op = op,
                session = %session,
                elapsed_ms = start.elapsed().as_millis() as u64,
                success = success,
                "session op"
            );
        }
    }

    /// Connects one fresh client per session. Pooling, timeouts, and TLS are
    /// the driver layer's concern; driver timeouts surface as ordinary
    /// [`DbError::Database`] failures.
    #[derive(Clone, Debug)]
    pub struct PgSessionFactory {
        conn_str: String,
    }

    impl PgSessionFactory {
        pub fn new<S: Into<String>>(conn_str: S) -> Self {
            Self {
                conn_str: conn_str.into(),
            }
        }
    }

    #[async_trait]
    impl SessionFactory for PgSessionFactory {
        async fn new_session(&self) -> DbResult<Arc<dyn Session>> {
            let (client, connection) = tokio_postgres::connect(&self.conn_str, NoTls)
                .await
                .map_err(DbError::database)?;
            // The connection object must be driven to process network events.
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    eprintln!("Postgres connection error: {}", e);
                }
            });
            Ok(Arc::new(PgSession {
                id: SessionId::mint(),
                client,
                in_tx: AtomicBool::new(false),
            }))
        }
    }

    /// A session over one `tokio_postgres::Client`. The connection itself is
    /// released when the session is dropped; `close` only marks the session
    /// finished.
    pub struct PgSession {
        id: SessionId,
        client: Client,
        in_tx: AtomicBool,
    }

    /// Convert `ParamValue`s into owned, boxed `ToSql` trait objects so their
    /// lifetimes outlive the query call.
    fn to_postgres_params(values: &[ParamValue]) -> Vec<Box<dyn ToSql + Sync + Send>> {
        values
            .iter()
            .map(|v| -> Box<dyn ToSql + Sync + Send> {
                match v {
                    ParamValue::String(s) => Box::new(s.clone()),
                    ParamValue::I32(i) => Box::new(*i),
                    ParamValue::I64(i) => Box::new(*i),
                    ParamValue::F64(f) => Box::new(*f),
                    ParamValue::Bool(b) => Box::new(*b),
                    ParamValue::Null => Box::new(Option::<i32>::None),
                }
            })
            .collect()
    }

    /// Whether a statement produces rows (fetch path) or an affected-row
    /// count (execute path).
    fn returns_rows(sql: &str) -> bool {
        let head = sql
            .trim_start()
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        matches!(head.as_str(), "SELECT" | "WITH" | "SHOW" | "VALUES")
    }

    fn to_param(row: &tokio_postgres::Row, idx: usize) -> DbResult<ParamValue> {
        let ty = row.columns()[idx].type_();
        let value = if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx)
                .map(|v| v.map(|v| ParamValue::I32(i32::from(v))))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx)
                .map(|v| v.map(ParamValue::I32))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx)
                .map(|v| v.map(ParamValue::I64))
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(idx)
                .map(|v| v.map(|v| ParamValue::F64(f64::from(v))))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(idx)
                .map(|v| v.map(ParamValue::F64))
        } else if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx)
                .map(|v| v.map(ParamValue::Bool))
        } else {
            // TEXT, VARCHAR, NAME, and anything else textual.
            row.try_get::<_, Option<String>>(idx)
                .map(|v| v.map(ParamValue::String))
        };
        Ok(value.map_err(DbError::database)?.unwrap_or(ParamValue::Null))
    }

    fn to_row(row: &tokio_postgres::Row, columns: &Arc<[String]>) -> DbResult<Row> {
        let values = (0..row.columns().len())
            .map(|i| to_param(row, i))
            .collect::<DbResult<Vec<_>>>()?;
        Ok(Row::new(Arc::clone(columns), values))
    }

    #[async_trait]
    impl Session for PgSession {
        fn id(&self) -> SessionId {
            self.id
        }

        async fn begin(&self) -> DbResult<()> {
            let start = Instant::now();
            let result = self
                .client
                .batch_execute("BEGIN")
                .await
                .map_err(DbError::database);
            if result.is_ok() {
                self.in_tx.store(true, Ordering::SeqCst);
            }
            obs_record("begin", self.id, start, result.is_ok());
            result
        }

        async fn commit(&self) -> DbResult<()> {
            let start = Instant::now();
            let result = self
                .client
                .batch_execute("COMMIT")
                .await
                .map_err(DbError::database);
            if result.is_ok() {
                self.in_tx.store(false, Ordering::SeqCst);
            }
            obs_record("commit", self.id, start, result.is_ok());
            result
        }

        async fn rollback(&self) -> DbResult<()> {
            let start = Instant::now();
            let result = self
                .client
                .batch_execute("ROLLBACK")
                .await
                .map_err(DbError::database);
            if result.is_ok() {
                self.in_tx.store(false, Ordering::SeqCst);
            }
            obs_record("rollback", self.id, start, result.is_ok());
            result
        }

        async fn close(&self) -> DbResult<()> {
            // tokio_postgres has no explicit disconnect; the connection task
            // ends when the client is dropped with the session.
            self.in_tx.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn execute(&self, statement: Statement) -> DbResult<QueryOutcome> {
            let start = Instant::now();
            let owned_params = to_postgres_params(&statement.params);
            let params: Vec<&(dyn ToSql + Sync)> = owned_params
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();

            let result = if returns_rows(&statement.sql) {
                match self.client.query(statement.sql.as_str(), &params[..]).await {
                    Ok(rows) => {
                        let columns: Arc<[String]> = rows
                            .first()
                            .map(|r| {
                                r.columns()
                                    .iter()
                                    .map(|c| c.name().to_string())
                                    .collect::<Vec<_>>()
                            })
                            .unwrap_or_default()
                            .into();
                        rows.iter()
                            .map(|r| to_row(r, &columns))
                            .collect::<DbResult<Vec<_>>>()
                            .map(QueryOutcome::from_rows)
                    }
                    Err(e) => Err(DbError::database(e)),
                }
            } else {
                self.client
                    .execute(statement.sql.as_str(), &params[..])
                    .await
                    .map_err(DbError::database)
                    .map(|rows_affected| QueryOutcome {
                        rows: Vec::new(),
                        rows_affected,
                    })
            };
            obs_record("execute", self.id, start, result.is_ok());
            result
        }

        fn in_transaction(&self) -> bool {
            self.in_tx.load(Ordering::SeqCst)
        }
    }

}

#[cfg(feature = "postgres-backend")]
pub use backend::{PgSession, PgSessionFactory};
