//! ITK transform files.
//!
//! Two encodings are supported, selected by file extension:
//!
//! * `.txt` / `.tfm`: the `#Insight Transform File V1.0` text format,
//!   including composite transforms written as consecutive blocks.
//! * `.mat`: the MATLAB v4 binary layout ITK uses, holding one variable
//!   named after the transform class (its parameters) and one named `fixed`
//!   (its fixed parameters, the center).
//!
//! Files are decoded into [`TransformKind`]. Rigid transforms are written as
//! `VersorRigid3DTransform`, isotropic similarities as
//! `Similarity3DTransform` and anisotropic ones as `AffineTransform`.

use std::fs;
use std::path::{Path, PathBuf};
use regkit_core::spatial::{is_proper_rotation, Matrix3, Point3, Vector3, ROTATION_TOLERANCE};
use regkit_core::transform::{CompositeTransform, RigidTransform, SimilarityTransform, TransformKind};
use regkit_core::TransformError;
use thiserror::Error;

/// First line of every text transform file.
pub const TEXT_HEADER: &str = "#Insight Transform File V1.0";

const COMPOSITE_CLASS: &str = "CompositeTransform_double_3_3";
const FIXED_VARIABLE: &str = "fixed";
const SCALE_TOLERANCE: f64 = 1e-6;

/// Errors raised while reading or writing transform files.
#[derive(Error, Debug)]
pub enum TransformFileError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported transform file format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed transform file: {0}")]
    Malformed(String),

    #[error("Unsupported transform class: {0}")]
    UnsupportedClass(String),

    #[error("Expected a {expected} transform, found a {found} transform")]
    UnexpectedKind {
        expected: &'static str,
        found: &'static str,
    },

    #[error(transparent)]
    Transform(#[from] TransformError),
}

impl TransformFileError {
    fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TransformFileError>;

/// On-disk encoding of a transform file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformFileFormat {
    Text,
    Matlab,
}

impl TransformFileFormat {
    /// Pick the encoding from the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match extension.as_deref() {
            Some("txt") | Some("tfm") => Ok(Self::Text),
            Some("mat") => Ok(Self::Matlab),
            _ => Err(TransformFileError::UnsupportedFormat(format!(
                "{} (expected .txt, .tfm or .mat)",
                path.display()
            ))),
        }
    }
}

/// One serialized transform, as ITK stores it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRecord {
    pub class_name: String,
    pub parameters: Vec<f64>,
    pub fixed_parameters: Vec<f64>,
}

impl TransformRecord {
    fn new(class_name: impl Into<String>, parameters: Vec<f64>, fixed_parameters: Vec<f64>) -> Self {
        Self {
            class_name: class_name.into(),
            parameters,
            fixed_parameters,
        }
    }

    /// Class name without the `_double_3_3` style suffix.
    pub fn base_class(&self) -> &str {
        self.class_name.split('_').next().unwrap_or_default()
    }

    fn is_composite(&self) -> bool {
        self.base_class() == "CompositeTransform"
    }

    fn parameters(&self, count: usize) -> Result<&[f64]> {
        if self.parameters.len() != count {
            return Err(TransformFileError::malformed(format!(
                "{} expects {} parameters, found {}",
                self.class_name,
                count,
                self.parameters.len()
            )));
        }
        Ok(&self.parameters)
    }

    fn center(&self) -> Result<Point3> {
        match self.fixed_parameters.get(0..3) {
            Some(c) => Ok(Point3::new(c[0], c[1], c[2])),
            None => Err(TransformFileError::malformed(format!(
                "{} expects at least 3 fixed parameters, found {}",
                self.class_name,
                self.fixed_parameters.len()
            ))),
        }
    }

    /// Decode a non-composite record.
    pub fn to_transform(&self) -> Result<TransformKind> {
        match self.base_class() {
            "Euler3DTransform" => {
                let p = self.parameters(6)?;
                let center = self.center()?;
                let translation = Vector3::new(p[3], p[4], p[5]);
                let compute_zyx = self.fixed_parameters.get(3).is_some_and(|flag| *flag != 0.0);
                let angles = [p[0], p[1], p[2]];
                let rigid = if compute_zyx {
                    RigidTransform::from_euler_zyx(angles, translation, center)
                } else {
                    RigidTransform::from_euler_zxy(angles, translation, center)
                };
                Ok(rigid.into())
            }
            "VersorRigid3DTransform" => {
                let p = self.parameters(6)?;
                let rigid = RigidTransform::from_versor(
                    versor_from_vector(p[0], p[1], p[2])?,
                    Vector3::new(p[3], p[4], p[5]),
                    self.center()?,
                )?;
                Ok(rigid.into())
            }
            "Similarity3DTransform" => {
                let p = self.parameters(7)?;
                let rigid = RigidTransform::from_versor(
                    versor_from_vector(p[0], p[1], p[2])?,
                    Vector3::new(p[3], p[4], p[5]),
                    self.center()?,
                )?;
                Ok(SimilarityTransform::from_rigid(&rigid, Vector3::repeat(p[6])).into())
            }
            "ScaleVersor3DTransform" => {
                let p = self.parameters(9)?;
                let rotation = RigidTransform::from_versor(
                    versor_from_vector(p[0], p[1], p[2])?,
                    Vector3::zeros(),
                    Point3::origin(),
                )?;
                // ITK adds (scale - 1) to the diagonal of the versor matrix.
                let matrix = rotation.rotation() + Matrix3::from_diagonal(&Vector3::new(p[6] - 1.0, p[7] - 1.0, p[8] - 1.0));
                classify_matrix(matrix, Vector3::new(p[3], p[4], p[5]), self.center()?)
            }
            "AffineTransform" | "MatrixOffsetTransformBase" => {
                let p = self.parameters(12)?;
                let matrix = Matrix3::from_row_slice(&p[0..9]);
                classify_matrix(matrix, Vector3::new(p[9], p[10], p[11]), self.center()?)
            }
            _ => Err(TransformFileError::UnsupportedClass(self.class_name.clone())),
        }
    }

    /// Encode a rigid or similarity transform.
    pub fn from_transform(transform: &TransformKind) -> Result<Self> {
        match transform {
            TransformKind::Rigid(rigid) => {
                let v = rigid.versor();
                let t = rigid.translation();
                Ok(Self::new(
                    "VersorRigid3DTransform_double_3_3",
                    vec![v[0], v[1], v[2], t[0], t[1], t[2]],
                    rigid.center().coords.as_slice().to_vec(),
                ))
            }
            TransformKind::Similarity(similarity) if similarity.is_isotropic() => {
                let v = similarity.to_rigid().versor();
                let t = similarity.translation();
                Ok(Self::new(
                    "Similarity3DTransform_double_3_3",
                    vec![v[0], v[1], v[2], t[0], t[1], t[2], similarity.scale()[0]],
                    similarity.center().coords.as_slice().to_vec(),
                ))
            }
            TransformKind::Similarity(similarity) => {
                let m = similarity.matrix();
                let t = similarity.translation();
                let mut parameters: Vec<f64> = (0..3).flat_map(|r| (0..3).map(move |c| m[(r, c)])).collect();
                parameters.extend_from_slice(t.as_slice());
                Ok(Self::new(
                    "AffineTransform_double_3_3",
                    parameters,
                    similarity.center().coords.as_slice().to_vec(),
                ))
            }
            TransformKind::Composite(_) => Err(TransformFileError::UnsupportedFormat(
                "a composite transform has no single-record encoding".to_string(),
            )),
        }
    }
}

/// Complete a versor from its vector part, `w >= 0`.
fn versor_from_vector(x: f64, y: f64, z: f64) -> Result<[f64; 4]> {
    let norm2 = x * x + y * y + z * z;
    if !norm2.is_finite() || norm2 > 1.0 + 1e-9 {
        return Err(TransformFileError::malformed(format!(
            "versor part ({}, {}, {}) has norm greater than one",
            x, y, z
        )));
    }
    Ok([x, y, z, (1.0 - norm2).max(0.0).sqrt()])
}

/// Interpret `T(x) = M(x - c) + c + t` as a rigid or similarity transform.
fn classify_matrix(matrix: Matrix3, translation: Vector3, center: Point3) -> Result<TransformKind> {
    let scale = Vector3::from_fn(|c, _| matrix.column(c).norm());
    if scale.iter().any(|s| !(*s > f64::EPSILON)) {
        return Err(TransformError::unrepresentable("matrix has a degenerate column").into());
    }
    let rotation = matrix * Matrix3::from_diagonal(&scale.map(|s| 1.0 / s));
    if !is_proper_rotation(&rotation, ROTATION_TOLERANCE) {
        return Err(TransformError::unrepresentable(
            "matrix is not a rotation times a per-axis scale (shear or reflection)",
        )
        .into());
    }

    if (scale - Vector3::repeat(1.0)).amax() < SCALE_TOLERANCE {
        Ok(RigidTransform::new(rotation, translation, center)?.into())
    } else {
        Ok(SimilarityTransform::new(rotation, translation, center, scale)?.into())
    }
}

fn records_to_transform(records: Vec<TransformRecord>) -> Result<TransformKind> {
    let mut records = records.into_iter().peekable();
    let composite = match records.peek() {
        None => return Err(TransformFileError::malformed("file contains no transform")),
        Some(first) => first.is_composite(),
    };
    if composite {
        records.next();
    }

    let mut members = records
        .map(|record| {
            if record.is_composite() {
                Err(TransformFileError::malformed("nested composite transform block"))
            } else {
                record.to_transform()
            }
        })
        .collect::<Result<Vec<_>>>()?;

    if !composite && members.len() == 1 {
        if let Some(single) = members.pop() {
            return Ok(single);
        }
    }
    Ok(CompositeTransform::from_transforms(members).into())
}

fn transform_to_records(transform: &TransformKind) -> Result<Vec<TransformRecord>> {
    match transform {
        TransformKind::Composite(composite) => {
            let mut records = vec![TransformRecord::new(COMPOSITE_CLASS, Vec::new(), Vec::new())];
            for member in composite.flattened().transforms() {
                records.push(TransformRecord::from_transform(member)?);
            }
            Ok(records)
        }
        other => Ok(vec![TransformRecord::from_transform(other)?]),
    }
}

// ---------------------------------------------------------------------------
// Text encoding
// ---------------------------------------------------------------------------

/// Parse the contents of a text transform file.
pub fn parse_text(content: &str) -> Result<TransformKind> {
    let mut lines = content.lines().map(str::trim).filter(|line| !line.is_empty());
    match lines.next() {
        Some(header) if header.starts_with("#Insight Transform File") => {}
        _ => return Err(TransformFileError::malformed(format!("missing '{}' header", TEXT_HEADER))),
    }

    let mut records: Vec<TransformRecord> = Vec::new();
    for line in lines {
        if line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| TransformFileError::malformed(format!("expected 'Key: value', found '{}'", line)))?;
        match key.trim() {
            "Transform" => records.push(TransformRecord::new(value.trim(), Vec::new(), Vec::new())),
            "Parameters" => current_record(&mut records, line)?.parameters = parse_values(value)?,
            "FixedParameters" => current_record(&mut records, line)?.fixed_parameters = parse_values(value)?,
            other => tracing::debug!(key = other, "ignoring transform file entry"),
        }
    }

    records_to_transform(records)
}

fn current_record<'a>(records: &'a mut [TransformRecord], line: &str) -> Result<&'a mut TransformRecord> {
    records
        .last_mut()
        .ok_or_else(|| TransformFileError::malformed(format!("'{}' appears before any 'Transform:' line", line)))
}

fn parse_values(value: &str) -> Result<Vec<f64>> {
    value
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| TransformFileError::malformed(format!("'{}' is not a number", token)))
        })
        .collect()
}

/// Render a transform in the text encoding.
pub fn format_text(transform: &TransformKind) -> Result<String> {
    let mut out = String::from(TEXT_HEADER);
    out.push('\n');
    for (index, record) in transform_to_records(transform)?.iter().enumerate() {
        out.push_str(&format!("#Transform {}\n", index));
        out.push_str(&format!("Transform: {}\n", record.class_name));
        if record.is_composite() {
            continue;
        }
        out.push_str(&format!("Parameters: {}\n", join_values(&record.parameters)));
        out.push_str(&format!("FixedParameters: {}\n", join_values(&record.fixed_parameters)));
    }
    Ok(out)
}

fn join_values(values: &[f64]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// MATLAB v4 encoding
// ---------------------------------------------------------------------------

/// Decode a MATLAB v4 transform file.
pub fn decode_matlab(bytes: &[u8]) -> Result<TransformKind> {
    let mut cursor = 0usize;
    let mut parameters: Option<(String, Vec<f64>)> = None;
    let mut fixed: Option<Vec<f64>> = None;

    while cursor < bytes.len() {
        let (name, values) = read_matlab_variable(bytes, &mut cursor)?;
        if name == FIXED_VARIABLE {
            fixed = Some(values);
        } else {
            parameters = Some((name, values));
        }
    }

    let (class_name, parameters) =
        parameters.ok_or_else(|| TransformFileError::malformed("no parameter variable in MATLAB file"))?;
    let fixed = fixed.ok_or_else(|| TransformFileError::malformed("no 'fixed' variable in MATLAB file"))?;
    TransformRecord::new(class_name, parameters, fixed).to_transform()
}

/// Encode a rigid or similarity transform as a MATLAB v4 file.
pub fn encode_matlab(transform: &TransformKind) -> Result<Vec<u8>> {
    let record = TransformRecord::from_transform(transform)?;
    let mut out = Vec::new();
    write_matlab_variable(&mut out, &record.class_name, &record.parameters);
    write_matlab_variable(&mut out, FIXED_VARIABLE, &record.fixed_parameters);
    Ok(out)
}

fn take<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = cursor
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| TransformFileError::malformed("MATLAB file is truncated"))?;
    let slice = &bytes[*cursor..end];
    *cursor = end;
    Ok(slice)
}

fn read_i32(bytes: &[u8], cursor: &mut usize) -> Result<i32> {
    let b = take(bytes, cursor, 4)?;
    Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_matlab_variable(bytes: &[u8], cursor: &mut usize) -> Result<(String, Vec<f64>)> {
    let mopt = read_i32(bytes, cursor)?;
    let rows = read_i32(bytes, cursor)?;
    let cols = read_i32(bytes, cursor)?;
    let imagf = read_i32(bytes, cursor)?;
    let name_len = read_i32(bytes, cursor)?;

    // MOPT = M * 1000 + O * 100 + P * 10 + T
    let (machine, precision, kind) = (mopt / 1000, (mopt / 10) % 10, mopt % 10);
    if mopt < 0 || machine != 0 {
        return Err(TransformFileError::malformed(format!(
            "unsupported MATLAB type {} (only little-endian files are read)",
            mopt
        )));
    }
    if kind != 0 || imagf != 0 {
        return Err(TransformFileError::malformed("MATLAB variable is not a real numeric matrix"));
    }
    if rows < 0 || cols < 0 || name_len <= 0 {
        return Err(TransformFileError::malformed("negative MATLAB matrix dimensions"));
    }

    let name_bytes = take(bytes, cursor, name_len as usize)?;
    let name = String::from_utf8_lossy(name_bytes).trim_end_matches('\0').to_string();

    let width = match precision {
        0 => 8,
        1 => 4,
        _ => {
            return Err(TransformFileError::malformed(format!(
                "unsupported MATLAB precision {} in variable '{}'",
                precision, name
            )))
        }
    };
    let len = (rows as usize)
        .checked_mul(cols as usize)
        .and_then(|count| count.checked_mul(width))
        .ok_or_else(|| TransformFileError::malformed(format!("MATLAB variable '{}' is too large", name)))?;
    let data = take(bytes, cursor, len)?;
    let values = match width {
        8 => data
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect(),
        _ => data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
    };
    Ok((name, values))
}

fn write_matlab_variable(out: &mut Vec<u8>, name: &str, values: &[f64]) {
    let header: [i32; 5] = [0, values.len() as i32, 1, 0, name.len() as i32 + 1];
    for field in header {
        out.extend_from_slice(&field.to_le_bytes());
    }
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Read a transform file of either encoding.
pub fn read_transform<P: AsRef<Path>>(path: P) -> Result<TransformKind> {
    let path = path.as_ref();
    let format = TransformFileFormat::from_path(path)?;
    let io_error = |source| TransformFileError::Io {
        path: path.to_path_buf(),
        source,
    };
    let transform = match format {
        TransformFileFormat::Text => parse_text(&fs::read_to_string(path).map_err(io_error)?)?,
        TransformFileFormat::Matlab => decode_matlab(&fs::read(path).map_err(io_error)?)?,
    };
    tracing::debug!(path = %path.display(), kind = transform.kind_name(), "read transform");
    Ok(transform)
}

/// Write a transform file; the encoding follows the extension.
///
/// Composite transforms can only be written in the text encoding.
pub fn write_transform<P: AsRef<Path>>(path: P, transform: &TransformKind) -> Result<()> {
    let path = path.as_ref();
    let bytes = match TransformFileFormat::from_path(path)? {
        TransformFileFormat::Text => format_text(transform)?.into_bytes(),
        TransformFileFormat::Matlab => encode_matlab(transform)?,
    };
    fs::write(path, bytes).map_err(|source| TransformFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), kind = transform.kind_name(), "wrote transform");
    Ok(())
}

/// Read a file that must hold a rigid transform.
pub fn read_rigid_transform<P: AsRef<Path>>(path: P) -> Result<RigidTransform> {
    match read_transform(path)? {
        TransformKind::Rigid(rigid) => Ok(rigid),
        other => Err(TransformFileError::UnexpectedKind {
            expected: "rigid",
            found: other.kind_name(),
        }),
    }
}

/// Read a file holding a rigid or similarity transform as a similarity.
pub fn read_similarity_transform<P: AsRef<Path>>(path: P) -> Result<SimilarityTransform> {
    match read_transform(path)? {
        TransformKind::Rigid(rigid) => Ok(rigid.into()),
        TransformKind::Similarity(similarity) => Ok(similarity),
        other => Err(TransformFileError::UnexpectedKind {
            expected: "similarity",
            found: other.kind_name(),
        }),
    }
}

/// Read a file as a composite; a single transform is wrapped.
pub fn read_composite_transform<P: AsRef<Path>>(path: P) -> Result<CompositeTransform> {
    Ok(match read_transform(path)? {
        TransformKind::Composite(composite) => composite,
        single => CompositeTransform::from_transforms(vec![single]),
    })
}
