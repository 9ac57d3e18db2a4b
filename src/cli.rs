use clap::{Parser, Subcommand};

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_DATA_FILE: &str = "casos_tia_por_anio_enfermedad_con_nombres.csv";
const DEFAULT_GEOJSON_FILE: &str = "loreto_distritos.geojson";

#[derive(Parser, Debug)]
#[command(name = "epi-backend")]
#[command(about = "Loreto disease-incidence API (CSV + GeoJSON)", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load and validate the case table and boundary file, print a summary.
    Check(CheckArgs),
    /// Serve the HTTP API.
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct CheckArgs {
    /// Directory holding the case table and boundary file.
    #[arg(long, env = "DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    /// Case-count CSV inside the data directory.
    #[arg(long, env = "DATA_FILE", default_value = DEFAULT_DATA_FILE)]
    pub data_file: String,

    /// District-boundary GeoJSON inside the data directory.
    #[arg(long, env = "GEOJSON_FILE", default_value = DEFAULT_GEOJSON_FILE)]
    pub geojson_file: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Directory holding the case table and boundary file.
    #[arg(long, env = "DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    /// Case-count CSV inside the data directory.
    #[arg(long, env = "DATA_FILE", default_value = DEFAULT_DATA_FILE)]
    pub data_file: String,

    /// District-boundary GeoJSON inside the data directory.
    #[arg(long, env = "GEOJSON_FILE", default_value = DEFAULT_GEOJSON_FILE)]
    pub geojson_file: String,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// HS256 signing key for access tokens.
    #[arg(
        long,
        env = "SECRET_KEY",
        default_value = "y9pZ5g7rQ2nL1uM8vX6dA0sK4eT3bH9c",
        hide_default_value = true
    )]
    pub secret_key: String,

    /// Access-token lifetime in minutes.
    #[arg(long, env = "TOKEN_EXPIRE_MINUTES", default_value_t = 60)]
    pub token_expire_minutes: u64,

    /// Append-only file of revoked tokens, one per line.
    #[arg(long, env = "BLACKLIST_FILE", default_value = "./token_blacklist.txt")]
    pub blacklist_file: String,
}
