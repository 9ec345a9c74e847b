//! End-to-end flattening and routing tests.
//!
//! These tests drive the public API the way an ORM integration would:
//! register mappings, register a provider, and bulk insert entity
//! collections, asserting on the rows the provider receives.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal_macros::dec;

use entity_bulkcopy::{
    bulk_insert, bulk_insert_buffered, BulkContext, BulkCopyError,
    BulkCopyOptions, BulkInsertProvider, BulkTransaction, ColumnDescriptor, Entity, EntityType,
    Field, Fields, MappingCatalog, MappingProvider, ProviderRegistry, Result, RowCursor, SqlType,
    SqlValue, TypeColumnSet, DEFAULT_BATCH_SIZE,
};

// =============================================================================
// Fixtures: a capturing provider and a catalog-backed context
// =============================================================================

/// Everything one run handed to the provider, for assertions.
#[derive(Debug, Default, Clone)]
struct Captured {
    schema: String,
    table: String,
    field_count: usize,
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue<'static>>>,
}

/// Provider that flattens into memory instead of a database.
struct CapturingProvider {
    kind: &'static str,
    captured: Arc<Mutex<Captured>>,
}

impl CapturingProvider {
    fn new(kind: &'static str) -> (Self, Arc<Mutex<Captured>>) {
        let captured = Arc::new(Mutex::new(Captured::default()));
        (
            Self {
                kind,
                captured: captured.clone(),
            },
            captured,
        )
    }

    fn drain(&self, cursor: &mut dyn RowCursor) -> Result<u64> {
        let ordinals: Vec<usize> = cursor
            .column_mappings()
            .iter()
            .map(|b| cursor.ordinal(&b.source).unwrap())
            .collect();
        let mut captured = self.captured.lock().unwrap();
        captured.schema = cursor.schema().to_string();
        captured.table = cursor.table().to_string();
        captured.field_count = cursor.field_count();
        captured.columns = cursor
            .column_mappings()
            .iter()
            .map(|b| b.destination.clone())
            .collect();
        let mut rows = 0u64;
        while cursor.advance() {
            captured
                .rows
                .push(ordinals.iter().map(|&i| cursor.value(i)).collect());
            rows += 1;
        }
        Ok(rows)
    }
}

#[async_trait]
impl BulkInsertProvider for CapturingProvider {
    fn connection_kind(&self) -> &str {
        self.kind
    }

    async fn run(
        &self,
        cursor: &mut dyn RowCursor,
        _options: BulkCopyOptions,
        _batch_size: usize,
    ) -> Result<u64> {
        self.drain(cursor)
    }

    async fn run_in(
        &self,
        _transaction: &mut BulkTransaction<'_>,
        cursor: &mut dyn RowCursor,
        _options: BulkCopyOptions,
        _batch_size: usize,
    ) -> Result<u64> {
        self.drain(cursor)
    }
}

struct TestContext {
    kind: &'static str,
    catalog: MappingCatalog,
}

impl BulkContext for TestContext {
    fn connection_kind(&self) -> &str {
        self.kind
    }

    fn mappings(&self) -> &dyn MappingProvider {
        &self.catalog
    }
}

// =============================================================================
// Fixtures: a flat entity, a nested entity, and a subtype hierarchy
// =============================================================================

#[derive(Clone)]
struct Page {
    id: i32,
    title: String,
    content: Option<String>,
    parent_id: Option<i32>,
    created_at: chrono::NaiveDateTime,
    modified_at: Option<chrono::NaiveDateTime>,
}

impl Fields for Page {
    fn field(&self, name: &str) -> Option<Field<'_>> {
        match name {
            "id" => Some(Field::Value(SqlValue::I32(self.id))),
            "title" => Some(Field::Value(SqlValue::text_owned(self.title.clone()))),
            "content" => self
                .content
                .clone()
                .map(|c| Field::Value(SqlValue::text_owned(c))),
            "parent_id" => self.parent_id.map(|p| Field::Value(SqlValue::I32(p))),
            "created_at" => Some(Field::Value(SqlValue::DateTime(self.created_at))),
            "modified_at" => self.modified_at.map(|m| Field::Value(SqlValue::DateTime(m))),
            _ => None,
        }
    }
}

impl Entity for Page {
    fn type_tag(&self) -> &'static str {
        "Page"
    }
}

impl EntityType for Page {
    const TAG: &'static str = "Page";
}

fn page_mappings() -> MappingCatalog {
    let mut catalog = MappingCatalog::new();
    catalog.register(TypeColumnSet::new(
        "Page",
        "dbo",
        "Pages",
        vec![
            ColumnDescriptor::scalar("Id", &["id"], SqlType::I32).identity(),
            ColumnDescriptor::scalar("Title", &["title"], SqlType::Text),
            ColumnDescriptor::scalar("Content", &["content"], SqlType::Text),
            ColumnDescriptor::scalar("ParentId", &["parent_id"], SqlType::I32).navigation(true),
            ColumnDescriptor::scalar("CreatedAt", &["created_at"], SqlType::DateTime),
            ColumnDescriptor::scalar("ModifiedAt", &["modified_at"], SqlType::DateTime),
        ],
    ));
    catalog
}

fn pages() -> Vec<Page> {
    let created = chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
        .unwrap()
        .and_hms_opt(9, 30, 0)
        .unwrap();
    vec![
        Page {
            id: 1,
            title: "Home".to_string(),
            content: Some("welcome".to_string()),
            parent_id: None,
            created_at: created,
            modified_at: None,
        },
        Page {
            id: 2,
            title: "About".to_string(),
            content: None,
            parent_id: Some(1),
            created_at: created,
            modified_at: Some(created),
        },
    ]
}

struct Address {
    street: String,
    city: Option<String>,
}

impl Fields for Address {
    fn field(&self, name: &str) -> Option<Field<'_>> {
        match name {
            "street" => Some(Field::Value(SqlValue::text_owned(self.street.clone()))),
            "city" => self
                .city
                .clone()
                .map(|c| Field::Value(SqlValue::text_owned(c))),
            _ => None,
        }
    }
}

struct Contact {
    phone: String,
    address: Option<Address>,
}

impl Fields for Contact {
    fn field(&self, name: &str) -> Option<Field<'_>> {
        match name {
            "phone" => Some(Field::Value(SqlValue::text_owned(self.phone.clone()))),
            "address" => self
                .address
                .as_ref()
                .map(|a| Field::Nested(a as &dyn Fields)),
            _ => None,
        }
    }
}

struct User {
    id: uuid::Uuid,
    name: String,
    contact: Option<Contact>,
}

impl Fields for User {
    fn field(&self, name: &str) -> Option<Field<'_>> {
        match name {
            "id" => Some(Field::Value(SqlValue::Uuid(self.id))),
            "name" => Some(Field::Value(SqlValue::text_owned(self.name.clone()))),
            "contact" => self
                .contact
                .as_ref()
                .map(|c| Field::Nested(c as &dyn Fields)),
            _ => None,
        }
    }
}

impl Entity for User {
    fn type_tag(&self) -> &'static str {
        "User"
    }
}

impl EntityType for User {
    const TAG: &'static str = "User";
}

fn user_mappings() -> MappingCatalog {
    let mut catalog = MappingCatalog::new();
    catalog.register(TypeColumnSet::new(
        "User",
        "dbo",
        "Users",
        vec![
            ColumnDescriptor::scalar("Id", &["id"], SqlType::Uuid),
            ColumnDescriptor::scalar("Name", &["name"], SqlType::Text),
            ColumnDescriptor::scalar("ContactPhone", &["contact", "phone"], SqlType::Text),
            ColumnDescriptor::scalar(
                "ContactStreet",
                &["contact", "address", "street"],
                SqlType::Text,
            ),
            ColumnDescriptor::scalar(
                "ContactCity",
                &["contact", "address", "city"],
                SqlType::Text,
            ),
        ],
    ));
    catalog
}

enum Contract {
    Fixed { id: i32, margin: rust_decimal::Decimal },
    Stock { id: i32, ticker: String },
    Prepaid { id: i32, minutes: i32 },
}

impl Fields for Contract {
    fn field(&self, name: &str) -> Option<Field<'_>> {
        match (self, name) {
            (Contract::Fixed { id, .. }, "id")
            | (Contract::Stock { id, .. }, "id")
            | (Contract::Prepaid { id, .. }, "id") => Some(Field::Value(SqlValue::I32(*id))),
            (Contract::Fixed { margin, .. }, "margin") => {
                Some(Field::Value(SqlValue::Decimal(*margin)))
            }
            (Contract::Stock { ticker, .. }, "ticker") => {
                Some(Field::Value(SqlValue::text_owned(ticker.clone())))
            }
            (Contract::Prepaid { minutes, .. }, "minutes") => {
                Some(Field::Value(SqlValue::I32(*minutes)))
            }
            _ => None,
        }
    }
}

impl Entity for Contract {
    fn type_tag(&self) -> &'static str {
        match self {
            Contract::Fixed { .. } => "ContractFixed",
            Contract::Stock { .. } => "ContractStock",
            Contract::Prepaid { .. } => "ContractPrepaid",
        }
    }
}

impl EntityType for Contract {
    const TAG: &'static str = "ContractBase";
}

fn contract_mappings() -> MappingCatalog {
    let mut catalog = MappingCatalog::new();
    let shared = |discriminator: &str, extra: Vec<ColumnDescriptor>| {
        let mut columns = vec![
            ColumnDescriptor::scalar("Id", &["id"], SqlType::I32).identity(),
            ColumnDescriptor::discriminator(
                "Discriminator",
                SqlValue::text_owned(discriminator.to_string()),
            ),
        ];
        columns.extend(extra);
        columns
    };
    catalog.register(TypeColumnSet::new(
        "ContractFixed",
        "dbo",
        "Contracts",
        shared(
            "Fixed",
            vec![ColumnDescriptor::scalar("Margin", &["margin"], SqlType::Decimal)],
        ),
    ));
    catalog.register(TypeColumnSet::new(
        "ContractStock",
        "dbo",
        "Contracts",
        shared(
            "Stock",
            vec![ColumnDescriptor::scalar("Ticker", &["ticker"], SqlType::Text)],
        ),
    ));
    catalog.register(TypeColumnSet::new(
        "ContractPrepaid",
        "dbo",
        "Contracts",
        shared(
            "Prepaid",
            vec![ColumnDescriptor::scalar("Minutes", &["minutes"], SqlType::I32)],
        ),
    ));
    catalog.register_subtype("ContractBase", "ContractFixed");
    catalog.register_subtype("ContractBase", "ContractStock");
    catalog.register_subtype("ContractBase", "ContractPrepaid");
    catalog
}

fn registry_with(kind: &'static str) -> (ProviderRegistry, Arc<Mutex<Captured>>) {
    let (provider, captured) = CapturingProvider::new(kind);
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(provider));
    (registry, captured)
}

// =============================================================================
// Flat entity inserts
// =============================================================================

#[tokio::test]
async fn test_flat_entity_insert_maps_all_writable_columns() {
    let (registry, captured) = registry_with("mssql");
    let context = TestContext {
        kind: "mssql",
        catalog: page_mappings(),
    };

    let rows = bulk_insert(
        &registry,
        &context,
        pages(),
        BulkCopyOptions::default(),
        DEFAULT_BATCH_SIZE,
    )
    .await
    .unwrap();

    assert_eq!(rows, 2);
    let captured = captured.lock().unwrap();
    assert_eq!(captured.schema, "dbo");
    assert_eq!(captured.table, "Pages");
    // Identity slot is counted even though it is not written.
    assert_eq!(captured.field_count, 6);
    assert_eq!(
        captured.columns,
        vec!["Title", "Content", "ParentId", "CreatedAt", "ModifiedAt"]
    );
    // Optional scalars surface as typed NULLs.
    assert_eq!(captured.rows[0][2], SqlValue::Null(SqlType::I32));
    assert_eq!(captured.rows[1][1], SqlValue::Null(SqlType::Text));
    assert_eq!(captured.rows[1][2], SqlValue::I32(1));
}

#[tokio::test]
async fn test_keep_identity_adds_identity_to_mapping_list() {
    let (registry, captured) = registry_with("mssql");
    let context = TestContext {
        kind: "mssql",
        catalog: page_mappings(),
    };

    bulk_insert(
        &registry,
        &context,
        pages(),
        BulkCopyOptions::KEEP_IDENTITY,
        DEFAULT_BATCH_SIZE,
    )
    .await
    .unwrap();

    let captured = captured.lock().unwrap();
    assert_eq!(captured.field_count, 6);
    assert_eq!(captured.columns[0], "Id");
    assert_eq!(captured.rows[0][0], SqlValue::I32(1));
    assert_eq!(captured.rows[1][0], SqlValue::I32(2));
}

// =============================================================================
// Nested property paths
// =============================================================================

#[tokio::test]
async fn test_nested_paths_resolve_and_null_links_recover() {
    let (registry, captured) = registry_with("postgres");
    let context = TestContext {
        kind: "postgres",
        catalog: user_mappings(),
    };

    let users = vec![
        User {
            id: uuid::Uuid::new_v4(),
            name: "full".to_string(),
            contact: Some(Contact {
                phone: "555-0100".to_string(),
                address: Some(Address {
                    street: "Main St 1".to_string(),
                    city: Some("Tartu".to_string()),
                }),
            }),
        },
        User {
            id: uuid::Uuid::new_v4(),
            name: "no-address".to_string(),
            contact: Some(Contact {
                phone: "555-0101".to_string(),
                address: None,
            }),
        },
        User {
            id: uuid::Uuid::new_v4(),
            name: "no-contact".to_string(),
            contact: None,
        },
    ];

    let rows = bulk_insert(
        &registry,
        &context,
        users,
        BulkCopyOptions::default(),
        DEFAULT_BATCH_SIZE,
    )
    .await
    .unwrap();

    // A broken navigation link nulls its columns, never drops the row.
    assert_eq!(rows, 3);
    let captured = captured.lock().unwrap();
    assert_eq!(captured.field_count, 5);
    assert_eq!(
        captured.rows[0][3],
        SqlValue::text_owned("Main St 1".to_string())
    );
    assert_eq!(captured.rows[1][2], SqlValue::text_owned("555-0101".to_string()));
    assert_eq!(captured.rows[1][3], SqlValue::Null(SqlType::Text));
    assert_eq!(captured.rows[1][4], SqlValue::Null(SqlType::Text));
    assert_eq!(captured.rows[2][2], SqlValue::Null(SqlType::Text));
    assert_eq!(captured.rows[2][3], SqlValue::Null(SqlType::Text));
}

// =============================================================================
// Shared-table subtype hierarchies
// =============================================================================

#[tokio::test]
async fn test_subtype_hierarchy_unifies_columns_and_stamps_discriminators() {
    let (registry, captured) = registry_with("mssql");
    let context = TestContext {
        kind: "mssql",
        catalog: contract_mappings(),
    };

    let contracts = vec![
        Contract::Fixed {
            id: 1,
            margin: dec!(0.125),
        },
        Contract::Stock {
            id: 2,
            ticker: "MSFT".to_string(),
        },
        Contract::Prepaid { id: 3, minutes: 120 },
    ];

    let rows = bulk_insert(
        &registry,
        &context,
        contracts,
        BulkCopyOptions::default(),
        DEFAULT_BATCH_SIZE,
    )
    .await
    .unwrap();

    assert_eq!(rows, 3);
    let captured = captured.lock().unwrap();
    // Id + Discriminator + Margin + Ticker + Minutes, one shared layout.
    assert_eq!(captured.field_count, 5);
    assert_eq!(
        captured.columns,
        vec!["Discriminator", "Margin", "Ticker", "Minutes"]
    );

    assert_eq!(
        captured.rows[0],
        vec![
            SqlValue::text_owned("Fixed".to_string()),
            SqlValue::Decimal(dec!(0.125)),
            SqlValue::Null(SqlType::Text),
            SqlValue::Null(SqlType::I32),
        ]
    );
    assert_eq!(
        captured.rows[1],
        vec![
            SqlValue::text_owned("Stock".to_string()),
            SqlValue::Null(SqlType::Decimal),
            SqlValue::text_owned("MSFT".to_string()),
            SqlValue::Null(SqlType::I32),
        ]
    );
    assert_eq!(
        captured.rows[2],
        vec![
            SqlValue::text_owned("Prepaid".to_string()),
            SqlValue::Null(SqlType::Decimal),
            SqlValue::Null(SqlType::Text),
            SqlValue::I32(120),
        ]
    );
}

// =============================================================================
// Computed columns
// =============================================================================

struct Foo {
    bar: String,
}

impl Fields for Foo {
    fn field(&self, name: &str) -> Option<Field<'_>> {
        match name {
            "bar" => Some(Field::Value(SqlValue::text_owned(self.bar.clone()))),
            _ => None,
        }
    }
}

impl Entity for Foo {
    fn type_tag(&self) -> &'static str {
        "Foo"
    }
}

impl EntityType for Foo {
    const TAG: &'static str = "Foo";
}

fn foo_mappings() -> MappingCatalog {
    let mut catalog = MappingCatalog::new();
    catalog.register(TypeColumnSet::new(
        "Foo",
        "dbo",
        "Foos",
        vec![
            ColumnDescriptor::scalar("Id", &["id"], SqlType::I32).identity(),
            ColumnDescriptor::scalar("Bar", &["bar"], SqlType::Text),
            ColumnDescriptor::scalar("Z", &["z"], SqlType::I32).computed(),
        ],
    ));
    catalog
}

#[tokio::test]
async fn test_computed_columns_are_never_written() {
    let (registry, captured) = registry_with("mssql");
    let context = TestContext {
        kind: "mssql",
        catalog: foo_mappings(),
    };

    bulk_insert(
        &registry,
        &context,
        vec![Foo {
            bar: "x".to_string(),
        }],
        BulkCopyOptions::default(),
        DEFAULT_BATCH_SIZE,
    )
    .await
    .unwrap();

    let captured = captured.lock().unwrap();
    // Computed Z claims no slot; identity Id claims one but is unmapped.
    assert_eq!(captured.field_count, 2);
    assert_eq!(captured.columns, vec!["Bar"]);
    assert_eq!(
        captured.rows[0],
        vec![SqlValue::text_owned("x".to_string())]
    );
}

// =============================================================================
// Routing and error surfaces
// =============================================================================

#[tokio::test]
async fn test_unregistered_kind_is_provider_not_found() {
    let registry = ProviderRegistry::new();
    let context = TestContext {
        kind: "postgres",
        catalog: page_mappings(),
    };

    let err = bulk_insert(
        &registry,
        &context,
        pages(),
        BulkCopyOptions::default(),
        DEFAULT_BATCH_SIZE,
    )
    .await
    .unwrap_err();

    match err {
        BulkCopyError::ProviderNotFound(kind) => assert_eq!(kind, "postgres"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unmapped_type_is_config_error() {
    let (registry, _) = registry_with("mssql");
    let context = TestContext {
        kind: "mssql",
        catalog: MappingCatalog::new(),
    };

    let err = bulk_insert(
        &registry,
        &context,
        pages(),
        BulkCopyOptions::default(),
        DEFAULT_BATCH_SIZE,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, BulkCopyError::Config(_)));
}

// =============================================================================
// Buffered and joined variants produce the same rows
// =============================================================================

#[tokio::test]
async fn test_buffered_insert_matches_streaming_insert() {
    let context = TestContext {
        kind: "mssql",
        catalog: contract_mappings(),
    };
    let contracts = || {
        vec![
            Contract::Fixed {
                id: 1,
                margin: dec!(1.5),
            },
            Contract::Stock {
                id: 2,
                ticker: "AAPL".to_string(),
            },
        ]
    };

    let (streaming_registry, streaming) = registry_with("mssql");
    bulk_insert(
        &streaming_registry,
        &context,
        contracts(),
        BulkCopyOptions::default(),
        DEFAULT_BATCH_SIZE,
    )
    .await
    .unwrap();

    let (buffered_registry, buffered) = registry_with("mssql");
    bulk_insert_buffered(
        &buffered_registry,
        &context,
        contracts(),
        BulkCopyOptions::default(),
        DEFAULT_BATCH_SIZE,
    )
    .await
    .unwrap();

    let streaming = streaming.lock().unwrap();
    let buffered = buffered.lock().unwrap();
    assert_eq!(streaming.columns, buffered.columns);
    assert_eq!(streaming.rows, buffered.rows);
}
