//! CLI command definitions.

use clap::Subcommand;
use dispatch_core::geo::Coordinate;

#[derive(Subcommand)]
pub enum Commands {
    /// Price a delivery between two points
    Quote {
        /// Origin as LAT,LON
        #[arg(long, allow_hyphen_values = true)]
        from: Coordinate,

        /// Destination as LAT,LON
        #[arg(long, allow_hyphen_values = true)]
        to: Coordinate,

        /// Discount percentage (0-100)
        #[arg(long)]
        discount: Option<f64>,
    },

    /// Run a scripted session against the in-memory store and print cache statistics
    Demo {
        /// Number of orders to create
        #[arg(long, default_value_t = 12)]
        orders: u32,
    },

    /// Apply PostgreSQL migrations
    Migrate {
        /// Overrides database.url
        #[arg(long)]
        database_url: Option<String>,
    },

    /// Print the effective configuration
    Config,
}
