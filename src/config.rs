use crate::{err, error::HubError};
use clap::{Parser, Subcommand};

/// The default directory of the filesystem vector cache.
pub const DEFAULT_CACHE_PATH: &str = "vector-cache";
/// The default `RUST_LOG` filter.
const DEFAULT_LOG: &str = "info";
/// The default amount of hits returned by the `query` command.
const DEFAULT_TOP_K: usize = 4;

#[derive(Debug, Parser)]
#[command(name = "vectorhub", version = "0.1", about = "Ingest and query documents across vector databases", long_about = None)]
pub struct StartArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Database URL.
    #[arg(short, long, global = true)]
    db_url: Option<String>,

    /// RUST_LOG string to use as the env filter.
    #[arg(short, long, global = true)]
    log: Option<String>,

    /// Directory of the vector cache.
    #[arg(short, long, global = true)]
    cache_path: Option<String>,

    /// API key for the `openai` embedder. The embedder is registered only if a key is given.
    #[cfg(feature = "openai")]
    #[arg(long, global = true)]
    openai_key: Option<String>,

    /// Endpoint of an OpenAI compatible embedding API.
    #[cfg(feature = "openai")]
    #[arg(long, global = true)]
    openai_endpoint: Option<String>,

    /// URL of a fastembed server. The `fembed` embedder is registered only if a URL is given.
    #[cfg(feature = "fe-remote")]
    #[arg(long, global = true)]
    fembed_url: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check connector settings against the backend without persisting anything.
    Validate {
        /// Connector type, e.g. `chroma`.
        #[arg(short, long)]
        r#type: String,

        /// Connector settings as JSON.
        #[arg(short, long)]
        settings: String,
    },

    /// Validate and persist a connection for an organization.
    Register {
        #[arg(short, long)]
        organization: i64,

        #[arg(short, long)]
        r#type: String,

        #[arg(short, long)]
        settings: String,
    },

    /// List the connections of an organization.
    Connections {
        #[arg(short, long)]
        organization: i64,
    },

    /// List the namespaces of a connection.
    Namespaces {
        #[arg(short = 'C', long)]
        connection: i64,
    },

    /// Chunk, embed and store a text document.
    Ingest {
        #[arg(short = 'C', long)]
        connection: i64,

        #[arg(short, long)]
        namespace: String,

        /// Path to a plain text document.
        #[arg(short, long)]
        file: String,

        /// Key of the embedder to use.
        #[arg(short, long)]
        embedder: String,

        /// Public identifier of the document.
        #[arg(long)]
        doc_id: String,

        #[arg(long)]
        document_id: i64,

        #[arg(long)]
        workspace_id: i64,

        #[arg(long)]
        organization_id: i64,

        /// Additional metadata attached to every chunk, as a JSON object.
        #[arg(short, long)]
        metadata: Option<String>,
    },

    /// Re-insert the cached vectors of an ingested document without embedding again.
    Restore {
        #[arg(short = 'C', long)]
        connection: i64,

        #[arg(short, long)]
        namespace: String,

        /// Public identifier of the document.
        #[arg(long)]
        doc_id: String,

        #[arg(long)]
        document_id: i64,

        #[arg(long)]
        workspace_id: i64,

        #[arg(long)]
        organization_id: i64,
    },

    /// List the vectors recorded for a document.
    Vectors {
        #[arg(long)]
        document_id: i64,
    },

    /// Embed a text and return the most similar chunks.
    Query {
        #[arg(short = 'C', long)]
        connection: i64,

        #[arg(short, long)]
        namespace: String,

        #[arg(short, long)]
        text: String,

        #[arg(short, long)]
        embedder: String,

        #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },

    /// Delete vectors and their document mappings.
    Delete {
        #[arg(short = 'C', long)]
        connection: i64,

        #[arg(short, long)]
        namespace: String,

        /// Vector IDs.
        #[arg(short, long, value_delimiter = ',')]
        ids: Vec<String>,
    },
}

/// Implement a getter method on [StartArgs], using the `$var` environment variable as a fallback
/// and either error, default or return `None` if neither the argument nor the environment
/// variable is set.
macro_rules! arg {
    ($id:ident, $var:literal, required $msg:literal) => {
        impl StartArgs {
            pub fn $id(&self) -> Result<String, HubError> {
                match &self.$id {
                    Some(val) => Ok(val.to_string()),
                    None => match std::env::var($var) {
                        Ok(val) => Ok(val),
                        Err(_) => err!(MissingArgument, $msg),
                    },
                }
            }
        }
    };
    ($id:ident, $var:literal, default $value:expr) => {
        impl StartArgs {
            pub fn $id(&self) -> String {
                match &self.$id {
                    Some(val) => val.to_string(),
                    None => match std::env::var($var) {
                        Ok(val) => val,
                        Err(_) => $value,
                    },
                }
            }
        }
    };
    ($id:ident, $var:literal, optional) => {
        impl StartArgs {
            pub fn $id(&self) -> Option<String> {
                match &self.$id {
                    Some(val) => Some(val.to_string()),
                    None => std::env::var($var).ok(),
                }
            }
        }
    };
}

arg!(db_url, "DATABASE_URL", required "Database url not found; Pass --db-url or set DATABASE_URL");
arg!(log, "RUST_LOG", default String::from(DEFAULT_LOG));
arg!(cache_path, "CACHE_PATH", default String::from(DEFAULT_CACHE_PATH));

#[cfg(feature = "openai")]
arg!(openai_key, "OPENAI_KEY", optional);

#[cfg(feature = "openai")]
arg!(openai_endpoint, "OPENAI_ENDPOINT", optional);

#[cfg(feature = "fe-remote")]
arg!(fembed_url, "FEMBED_URL", optional);
