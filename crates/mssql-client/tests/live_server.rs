//! Tests against a real SQL Server instance.
//!
//! Run with:
//! ```bash
//! MSSQL_HOST=localhost MSSQL_USER=sa MSSQL_PASSWORD='YourStrong@Passw0rd' \
//!     cargo test -p mssql-client --test live_server -- --ignored
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use mssql_client::{Client, Config, SqlValue};

fn get_test_config() -> Option<Config> {
    let host = std::env::var("MSSQL_HOST").ok()?;
    let user = std::env::var("MSSQL_USER").unwrap_or_else(|_| "sa".into());
    let password = std::env::var("MSSQL_PASSWORD").unwrap_or_else(|_| "YourStrong@Passw0rd".into());
    let encrypt = std::env::var("MSSQL_ENCRYPT").unwrap_or_else(|_| "false".into());

    let conn_str = format!(
        "Server={host};Database=master;User Id={user};Password={password};\
         TrustServerCertificate=true;Encrypt={encrypt}"
    );
    Config::from_connection_string(&conn_str).ok()
}

#[tokio::test]
#[ignore = "Requires SQL Server"]
async fn test_select_version() {
    let config = get_test_config().expect("SQL Server config required");
    let client = Client::connect(config).await.expect("Failed to connect");

    let result = client.query("SELECT @@VERSION").await.unwrap();
    let version: String = result.rows()[0].get(0).unwrap();
    assert!(version.contains("Microsoft SQL Server"));
    client.close().await.unwrap();
}

#[tokio::test]
#[ignore = "Requires SQL Server"]
async fn test_prepared_round_trip() {
    let config = get_test_config().expect("SQL Server config required");
    let client = Client::connect(config).await.expect("Failed to connect");

    let stmt = client.prepare("SELECT @P1 * 2, @P2").await.unwrap();
    for i in 1..=3 {
        let result = client.execute(&stmt, &[&i, &"x"]).await.unwrap();
        assert_eq!(result.rows()[0].get::<i32>(0).unwrap(), i * 2);
    }
    assert!(stmt.is_prepared());
    client.close_statement(&stmt).await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
#[ignore = "Requires SQL Server"]
async fn test_cursor_over_system_objects() {
    let config = get_test_config().expect("SQL Server config required");
    let client = Client::connect(config).await.expect("Failed to connect");

    let mut cursor = client
        .cursor("SELECT TOP 25 name FROM sys.objects", &[], 10)
        .unwrap();
    let mut total = 0;
    while let Some(page) = cursor.next_page().await.unwrap() {
        assert!(page.rows().len() <= 10);
        total += page.rows().len();
    }
    assert_eq!(total, 25);
    cursor.close().await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
#[ignore = "Requires SQL Server"]
async fn test_transaction_descriptor_is_tracked() {
    let config = get_test_config().expect("SQL Server config required");
    let client = Client::connect(config).await.expect("Failed to connect");

    client
        .query("CREATE TABLE #t (id INT); BEGIN TRANSACTION")
        .await
        .unwrap();
    let stmt = client.prepare("INSERT INTO #t VALUES (@P1)").await.unwrap();
    let sets = (1..=5).map(|i| vec![SqlValue::Int(i)]).collect();
    assert_eq!(client.execute_batch(&stmt, sets).await.unwrap().rows_affected(), 5);
    client.query("ROLLBACK TRANSACTION").await.unwrap();

    let result = client.query("SELECT COUNT(*) FROM #t").await.unwrap();
    assert_eq!(result.rows()[0].get::<i32>(0).unwrap(), 0);
    client.close().await.unwrap();
}
