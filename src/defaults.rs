/// Upper bound on instances requested from a provider in one listing.
pub const MAX_INSTANCES: i32 = 20;

/// RDS names MySQL slow-query logs `slowquery/mysql-slowquery.log[.N]`.
pub const AWS_SLOWQUERY_PREFIX: &str = "slowquery/mysql-slowquery";

/// Cloud SQL keeps slow-query entries in Cloud Logging; one ref is
/// generated per UTC day going back this many days.
pub const GCP_RETENTION_DAYS: u64 = 3;

pub const GCP_SLOWQUERY_LOG_ID: &str = "cloudsql.googleapis.com/mysql-slow.log";

pub const DEFAULT_OUTPUT: &str = "slowquery.log";

pub const DEFAULT_TESTDATA_DIR: &str = "testdata";

/// Destinations that mean "write to standard output".
pub const STDOUT_DESTINATIONS: [&str; 2] = ["-", "stdout"];
