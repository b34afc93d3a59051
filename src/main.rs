use clap::Parser;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;
use vectorhub::{
    app::{factory::Connectors, state::AppState},
    config::{Command, StartArgs},
    core::{
        embedder::Embedder,
        model::{
            document::{DocumentPayload, DocumentRecord},
            Outcome,
        },
        provider::{ConnectorProvider, ProviderFactory},
        repo::DocumentVectorRepo,
    },
    err,
    error::HubError,
    map_err,
};

#[tokio::main]
async fn main() {
    let args = StartArgs::parse();

    vectorhub::app::state::init_tracing(&args);

    if let Err(e) = run(args).await {
        e.print();
        std::process::exit(1);
    }
}

async fn run(args: StartArgs) -> Result<(), HubError> {
    // Validation needs no state.
    if let Command::Validate { r#type, settings } = &args.command {
        let settings = parse_json(settings)?;
        return print(&Connectors.validate(r#type, &settings).await);
    }

    let state = AppState::new(&args).await?;

    match args.command {
        Command::Validate { .. } => Ok(()),

        Command::Register {
            organization,
            r#type,
            settings,
        } => {
            let settings = parse_json(&settings)?;
            let connection = state
                .connections
                .register(organization, &r#type, &settings)
                .await?;
            print(&connection)
        }

        Command::Connections { organization } => {
            print(&state.connections.list(organization).await?)
        }

        Command::Namespaces { connection } => {
            let connector = state.connections.connector(connection).await?;
            print(&connector.namespaces().await)
        }

        Command::Ingest {
            connection,
            namespace,
            file,
            embedder,
            doc_id,
            document_id,
            workspace_id,
            organization_id,
            metadata,
        } => {
            let connector = state.connections.connector(connection).await?;

            let page_content = map_err!(tokio::fs::read_to_string(&file).await);

            let metadata = match metadata {
                Some(metadata) => match parse_json(&metadata)? {
                    Value::Object(map) => map,
                    _ => return err!(InvalidArgument, "metadata must be a JSON object"),
                },
                None => Map::new(),
            };

            let payload = DocumentPayload {
                id: Some(Value::String(doc_id.clone())),
                page_content,
                metadata,
            };

            let document = DocumentRecord {
                id: document_id,
                doc_id,
                workspace_id,
                organization_id,
            };

            let result = connector
                .process_document(state.pipeline.as_ref(), &namespace, payload, &embedder, &document)
                .await;

            if let Ok(ref processed) = result {
                info!(
                    "Stored {} vector(s), cache key {}",
                    processed.vector_ids.len(),
                    processed.cache_key
                );
            }

            print(&Outcome::from(result))
        }

        Command::Restore {
            connection,
            namespace,
            doc_id,
            document_id,
            workspace_id,
            organization_id,
        } => {
            let connector = state.connections.connector(connection).await?;

            let document = DocumentRecord {
                id: document_id,
                doc_id,
                workspace_id,
                organization_id,
            };

            let result = connector
                .restore_document(state.pipeline.as_ref(), &namespace, &document)
                .await;

            if let Ok(ref restored) = result {
                info!("Restored {} vector(s)", restored.vector_ids.len());
            }

            print(&Outcome::from(result))
        }

        Command::Vectors { document_id } => {
            print(&state.pipeline.repo.list_document_vectors(document_id).await?)
        }

        Command::Query {
            connection,
            namespace,
            text,
            embedder,
            top_k,
        } => {
            let connector = state.connections.connector(connection).await?;
            let embedder = state.embedders.get_provider(&embedder)?;

            let mut vectors = embedder.embed_text_chunks(&[text.as_str()]).await?;
            let Some(vector) = vectors.pop() else {
                return err!(EmbeddingFailure, "embedding failure");
            };

            print(&connector.similarity_response(&namespace, &vector, top_k).await)
        }

        Command::Delete {
            connection,
            namespace,
            ids,
        } => {
            let connector = state.connections.connector(connection).await?;
            let result = connector.delete_vectors(&namespace, &ids).await;

            if result.is_ok() {
                let removed = state.pipeline.repo.delete_document_vectors(&ids).await?;
                info!("Removed {removed} document mapping(s)");
            }

            print(&Outcome::from(result))
        }
    }
}

fn parse_json(input: &str) -> Result<Value, HubError> {
    Ok(map_err!(serde_json::from_str(input)))
}

fn print<T: Serialize>(value: &T) -> Result<(), HubError> {
    println!("{}", map_err!(serde_json::to_string_pretty(value)));
    Ok(())
}
