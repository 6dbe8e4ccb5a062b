//! Per-session cell history and its notebook file.
//!
//! The history is written as an nbformat 4.5 document so the backing path
//! opens in any notebook frontend.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use notebook_runtime_common::HistoryError;

use crate::result::ExecutionResult;

/// One recorded code unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
    /// Session execution counter at the time the unit ran.
    pub execution_count: u64,
    /// Submitted source.
    pub source: String,
    /// Outputs in notebook order.
    pub outputs: Vec<CellOutput>,
}

/// A notebook cell output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum CellOutput {
    Stream {
        name: String,
        text: String,
    },
    DisplayData {
        data: Map<String, Value>,
    },
    ExecuteResult {
        execution_count: u64,
        data: Map<String, Value>,
    },
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
}

impl Cell {
    /// Record `source` with the outputs of `result`.
    pub fn from_result(source: impl Into<String>, result: &ExecutionResult) -> Self {
        let mut outputs = Vec::new();
        if !result.stdout.is_empty() {
            outputs.push(CellOutput::Stream {
                name: "stdout".to_string(),
                text: result.stdout.clone(),
            });
        }
        if !result.stderr.is_empty() {
            outputs.push(CellOutput::Stream {
                name: "stderr".to_string(),
                text: result.stderr.clone(),
            });
        }
        if !result.display_data.is_empty() {
            outputs.push(CellOutput::DisplayData {
                data: result
                    .display_data
                    .iter()
                    .map(|(mime, payload)| (mime.clone(), payload.clone()))
                    .collect(),
            });
        }
        if let Some(repr) = &result.result {
            let mut data = Map::new();
            data.insert("text/plain".to_string(), Value::String(repr.clone()));
            outputs.push(CellOutput::ExecuteResult {
                execution_count: result.execution_count,
                data,
            });
        }
        if let Some(error) = &result.error {
            outputs.push(CellOutput::Error {
                ename: error.name.clone(),
                evalue: error.message.clone(),
                traceback: error.traceback.clone(),
            });
        }

        Self {
            execution_count: result.execution_count,
            source: source.into(),
            outputs,
        }
    }

    fn to_notebook_cell(&self, index: usize) -> Value {
        let outputs: Vec<Value> = self.outputs.iter().map(CellOutput::to_notebook_output).collect();
        json!({
            "cell_type": "code",
            "execution_count": self.execution_count,
            "id": format!("cell-{index}"),
            "metadata": {},
            "outputs": outputs,
            "source": split_lines(&self.source),
        })
    }
}

impl CellOutput {
    fn to_notebook_output(&self) -> Value {
        match self {
            Self::Stream { name, text } => json!({
                "output_type": "stream",
                "name": name,
                "text": split_lines(text),
            }),
            Self::DisplayData { data } => json!({
                "output_type": "display_data",
                "data": data,
                "metadata": {},
            }),
            Self::ExecuteResult {
                execution_count,
                data,
            } => json!({
                "output_type": "execute_result",
                "execution_count": execution_count,
                "data": data,
                "metadata": {},
            }),
            Self::Error {
                ename,
                evalue,
                traceback,
            } => json!({
                "output_type": "error",
                "ename": ename,
                "evalue": evalue,
                "traceback": traceback,
            }),
        }
    }
}

/// The ordered cells of one session, bound to its backing notebook.
#[derive(Debug, Clone)]
pub struct CellHistory {
    path: PathBuf,
    language: String,
    kernel_name: String,
    cells: Vec<Cell>,
}

impl CellHistory {
    /// Create an empty history for `path`.
    pub fn new(path: impl Into<PathBuf>, kernel_name: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            language: language.into(),
            kernel_name: kernel_name.into(),
            cells: Vec::new(),
        }
    }

    /// Backing notebook path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recorded cells in order.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Append a cell.
    pub fn push(&mut self, cell: Cell) {
        self.cells.push(cell);
    }

    /// Render the history as an nbformat document.
    pub fn to_notebook(&self) -> Value {
        let cells: Vec<Value> = self
            .cells
            .iter()
            .enumerate()
            .map(|(index, cell)| cell.to_notebook_cell(index + 1))
            .collect();
        json!({
            "cells": cells,
            "metadata": {
                "kernelspec": {
                    "display_name": self.kernel_name,
                    "language": self.language,
                    "name": self.kernel_name,
                },
                "language_info": { "name": self.language },
            },
            "nbformat": 4,
            "nbformat_minor": 5,
        })
    }

    /// Write the notebook to the backing path.
    ///
    /// The document is written to a sibling temp file and renamed into place,
    /// so readers never observe a partial notebook.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be encoded or written.
    pub fn save(&self) -> Result<(), HistoryError> {
        let encoded = serde_json::to_vec_pretty(&self.to_notebook())?;
        let io_err = |source| HistoryError::Io {
            path: self.path.display().to_string(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut temp_name = self.path.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".tmp");
        let temp_path = self.path.with_file_name(temp_name);

        let mut file = fs::File::create(&temp_path).map_err(io_err)?;
        file.write_all(&encoded).map_err(io_err)?;
        file.write_all(b"\n").map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        fs::rename(&temp_path, &self.path).map_err(io_err)?;

        debug!(path = %self.path.display(), cells = self.cells.len(), "Notebook saved");
        Ok(())
    }
}

/// Notebook multiline string: lines keep their terminators.
fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}
