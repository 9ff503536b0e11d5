use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use caravan_client::{Namespace, SessionMode, connect};
use caravan_ingest::readers::{CsvReader, JsonReader, RecordReader, TsvReader};
use caravan_ingest::{IngestOptions, IngestPipeline};
use clap::{Parser, ValueEnum};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{
    ConnectSnafu, ImportSnafu, InvalidOptionsSnafu, IoSnafu, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputType {
    Csv,
    Tsv,
    Json,
}

/// Import delimited text or JSON into a collection
#[derive(Parser)]
pub struct ImportArgs {
    /// Destination database
    #[arg(long, default_value = "test")]
    db: String,

    /// Destination collection; defaults to the input file stem
    #[arg(long)]
    collection: Option<String>,

    /// Input file; stdin when omitted
    #[arg(long)]
    file: Option<PathBuf>,

    /// Input format
    #[arg(long = "type", value_enum, default_value = "json")]
    input_type: InputType,

    /// Use the first record of the input as the field list
    #[arg(long)]
    headerline: bool,

    /// Comma-separated field list for delimited input
    #[arg(long)]
    fields: Option<String>,

    /// File holding one field name per line
    #[arg(long = "fieldFile")]
    field_file: Option<PathBuf>,

    /// Treat the input as a single JSON array
    #[arg(long = "jsonArray")]
    json_array: bool,

    /// Drop the destination collection before importing
    #[arg(long)]
    drop: bool,

    /// Upsert documents instead of inserting them
    #[arg(long)]
    upsert: bool,

    /// Comma-separated selector keys for upserts
    #[arg(long = "upsertFields")]
    upsert_fields: Option<String>,

    /// Stop at the first record or insert error
    #[arg(long = "stopOnError")]
    stop_on_error: bool,

    /// Drop empty-string values (delimited inputs only)
    #[arg(long = "ignoreBlanks")]
    ignore_blanks: bool,

    /// Number of parallel insertion workers
    #[arg(long = "numInsertionWorkers", default_value_t = 1)]
    workers: usize,

    /// Destination to connect to
    #[arg(long, default_value = "mem://local")]
    uri: String,
}

impl ImportArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        self.validate()?;

        let namespace = self.namespace()?;
        let provider = connect(&self.uri).context(ConnectSnafu)?;
        provider.set_mode(SessionMode::Primary);

        if self.drop {
            info!(namespace = %namespace, "dropping collection");
            let session = provider.get_session().await.context(ConnectSnafu)?;
            match session.drop_collection(&namespace).await {
                Ok(()) => {}
                Err(client_error) if client_error.is_not_found() => {}
                Err(client_error) => return Err(client_error).context(ConnectSnafu),
            }
        }

        let mut reader = self.reader()?;
        reader.set_header(self.headerline).context(ImportSnafu)?;

        let options = IngestOptions {
            ignore_blanks: self.ignore_blanks && self.input_type != InputType::Json,
            upsert: self.upsert,
            upsert_fields: split_list(self.upsert_fields.as_deref()),
            stop_on_error: self.stop_on_error,
            workers: self.workers,
            ..Default::default()
        };
        let pipeline = IngestPipeline::new(provider, namespace.clone(), options);

        let imported = tokio::select! {
            _ = ct.cancelled() => return Err(crate::error::CliError::Interrupted),
            result = pipeline.run(reader) => result.context(ImportSnafu)?,
        };
        info!(namespace = %namespace, documents = imported, "import finished");
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.input_type == InputType::Json {
            return Ok(());
        }
        if self.headerline {
            if self.fields.is_some() {
                return InvalidOptionsSnafu {
                    message: "incompatible options: --fields and --headerline",
                }
                .fail();
            }
            if self.field_file.is_some() {
                return InvalidOptionsSnafu {
                    message: "incompatible options: --fieldFile and --headerline",
                }
                .fail();
            }
            return Ok(());
        }
        if self.fields.is_some() && self.field_file.is_some() {
            return InvalidOptionsSnafu {
                message: "incompatible options: --fields and --fieldFile",
            }
            .fail();
        }
        if self.fields.is_none() && self.field_file.is_none() {
            return InvalidOptionsSnafu {
                message: "you need to specify fields or have a header line to import this file type",
            }
            .fail();
        }
        Ok(())
    }

    fn namespace(&self) -> Result<Namespace> {
        let collection = match &self.collection {
            Some(collection) => collection.clone(),
            None => {
                let Some(stem) = self
                    .file
                    .as_deref()
                    .and_then(Path::file_stem)
                    .map(|stem| stem.to_string_lossy().into_owned())
                else {
                    return InvalidOptionsSnafu {
                        message: "no collection specified",
                    }
                    .fail();
                };
                info!(collection = %stem, "no collection specified, using the input file stem");
                stem
            }
        };
        Namespace::new(self.db.as_str(), collection).map_err(|client_error| {
            crate::error::CliError::InvalidOptions {
                message: client_error.to_string(),
            }
        })
    }

    fn declared_fields(&self) -> Result<Vec<String>> {
        if let Some(fields) = &self.fields {
            return Ok(split_list(Some(fields)));
        }
        if let Some(path) = &self.field_file {
            let contents = std::fs::read_to_string(path).context(IoSnafu {
                path: path.display().to_string(),
            })?;
            return Ok(contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect());
        }
        Ok(Vec::new())
    }

    fn input(&self) -> Result<Box<dyn Read + Send>> {
        match &self.file {
            Some(path) => {
                let file = File::open(path).context(IoSnafu {
                    path: path.display().to_string(),
                })?;
                info!(filesize = file.metadata().map(|m| m.len()).unwrap_or(0), "opened input file");
                Ok(Box::new(file))
            }
            None => Ok(Box::new(std::io::stdin())),
        }
    }

    fn reader(&self) -> Result<Box<dyn RecordReader>> {
        let input = self.input()?;
        let reader: Box<dyn RecordReader> = match self.input_type {
            InputType::Csv => Box::new(CsvReader::new(self.declared_fields()?, input)),
            InputType::Tsv => Box::new(TsvReader::new(self.declared_fields()?, input)),
            InputType::Json => Box::new(JsonReader::new(self.json_array, input)),
        };
        Ok(reader)
    }
}

fn split_list(list: Option<&str>) -> Vec<String> {
    list.map(|list| {
        list.trim()
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
