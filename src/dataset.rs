use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde_json::Value;
use tokio::sync::OnceCell;

use crate::error::ApiError;
use crate::geo;
use crate::storage::DataPaths;

const REQUIRED_COLUMNS: [&str; 7] = [
    "ANO",
    "UBIGEO",
    "DIAGNOSTIC",
    "CASOS",
    "POBTOT",
    "TIA",
    "ENFERMEDAD",
];

/// One row of the case table after permissive coercion: non-parseable
/// numerics become None rather than failing the load.
#[derive(Debug, Clone)]
pub struct CaseRecord {
    pub year: Option<f64>,
    pub ubigeo: String,
    pub diagnostic: Option<String>,
    pub disease: Option<String>,
    pub cases: Option<f64>,
    pub population: Option<f64>,
    pub incidence: Option<f64>,
}

#[derive(Debug)]
pub struct DataBundle {
    pub records: Vec<CaseRecord>,
    pub boundaries: Value,
    pub code_to_name: HashMap<String, String>,
    /// Distinct (code, name) pairs, sorted by code then name.
    pub disease_pairs: Vec<(String, String)>,
    /// Distinct valid years, ascending.
    pub years: Vec<i32>,
}

impl DataBundle {
    pub fn has_year(&self, year: i32) -> bool {
        self.years.binary_search(&year).is_ok()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.disease_pairs.iter().any(|(c, _)| c == code)
    }
}

/// Process-lifetime cache around the loader. The bundle is built at
/// most once; concurrent first calls share one in-flight load, and a
/// failed load leaves the cell empty so the next request retries.
pub struct Dataset {
    paths: DataPaths,
    bundle: OnceCell<DataBundle>,
}

impl Dataset {
    pub fn new(paths: DataPaths) -> Self {
        Self {
            paths,
            bundle: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<&DataBundle, ApiError> {
        self.bundle
            .get_or_try_init(|| async { load_bundle(&self.paths) })
            .await
    }
}

pub fn load_bundle(paths: &DataPaths) -> Result<DataBundle, ApiError> {
    if !paths.cases_path.exists() {
        return Err(ApiError::Configuration(
            paths.cases_path.display().to_string(),
        ));
    }
    if !paths.boundaries_path.exists() {
        return Err(ApiError::Configuration(
            paths.boundaries_path.display().to_string(),
        ));
    }

    let records = read_case_table(&paths.cases_path)?;
    let boundaries = read_boundaries(&paths.boundaries_path)?;
    let code_to_name = geo::district_names(&boundaries);

    let mut pairs = BTreeSet::new();
    let mut years = BTreeSet::new();
    for rec in &records {
        if let (Some(code), Some(name)) = (&rec.diagnostic, &rec.disease) {
            pairs.insert((code.clone(), name.clone()));
        }
        if let Some(year) = rec.year {
            years.insert(year.trunc() as i32);
        }
    }

    tracing::info!(
        rows = records.len(),
        districts = code_to_name.len(),
        diseases = pairs.len(),
        "loaded case table and boundary document"
    );

    Ok(DataBundle {
        records,
        boundaries,
        code_to_name,
        disease_pairs: pairs.into_iter().collect(),
        years: years.into_iter().collect(),
    })
}

fn read_case_table(path: &Path) -> Result<Vec<CaseRecord>, ApiError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| ApiError::Internal(format!("open {}: {e}", path.display())))?;

    let headers = reader
        .headers()
        .map_err(|e| ApiError::Validation(format!("read header row: {e}")))?;
    let mut columns: HashMap<String, usize> = HashMap::new();
    for (idx, name) in headers.iter().enumerate() {
        columns.insert(name.trim().to_string(), idx);
    }

    let mut missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| !columns.contains_key(*c))
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        return Err(ApiError::Validation(format!(
            "missing columns: {}",
            missing.join(", ")
        )));
    }

    let ano = columns["ANO"];
    let ubigeo = columns["UBIGEO"];
    let diagnostic = columns["DIAGNOSTIC"];
    let casos = columns["CASOS"];
    let pobtot = columns["POBTOT"];
    let tia = columns["TIA"];
    let enfermedad = columns["ENFERMEDAD"];

    let mut records = Vec::new();
    for result in reader.records() {
        let row = result.map_err(|e| ApiError::Validation(format!("read case row: {e}")))?;
        let field = |idx: usize| row.get(idx).unwrap_or("");
        records.push(CaseRecord {
            year: parse_numeric(field(ano)),
            ubigeo: geo::normalize_ubigeo(field(ubigeo)),
            diagnostic: non_empty(field(diagnostic)),
            disease: non_empty(field(enfermedad)),
            cases: parse_numeric(field(casos)),
            population: parse_numeric(field(pobtot)),
            incidence: parse_numeric(field(tia)),
        });
    }
    Ok(records)
}

fn read_boundaries(path: &Path) -> Result<Value, ApiError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ApiError::Internal(format!("read {}: {e}", path.display())))?;
    // Boundary exports often carry a UTF-8 BOM.
    serde_json::from_str(raw.trim_start_matches('\u{feff}'))
        .map_err(|e| ApiError::Validation(format!("invalid boundary document: {e}")))
}

fn parse_numeric(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
