//! Compiled contract artifacts.
//!
//! Compilation is done by the Solidity toolchain (Hardhat writes `artifacts/`, Foundry
//! writes `out/`). This module finds the artifact of a contract by name and exposes
//! what deployment and verification need from it.

use std::path::{Path, PathBuf};

use alloy_core::dyn_abi::{DynSolValue, JsonAbiExt, Specifier};
use alloy_core::json_abi::{JsonAbi, Param};
use alloy_core::primitives::Bytes;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// Directory holding Hardhat build info files, skipped when searching artifacts.
const BUILD_INFO_DIR: &str = "build-info";

/// Bytecode as written by Hardhat (a hex string) or Foundry (an object).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    Hex(String),
    Object { object: String },
}

impl RawBytecode {
    fn into_hex(self) -> String {
        match self {
            Self::Hex(hex) | Self::Object { object: hex } => hex,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    #[serde(default)]
    contract_name: Option<String>,
    #[serde(default)]
    source_name: Option<String>,
    abi: JsonAbi,
    bytecode: RawBytecode,
}

/// Hardhat debug file pointing at the build info of an artifact.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebugFile {
    build_info: PathBuf,
}

/// Compiler input and version for a compilation, as recorded by Hardhat.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    /// Full compiler version, e.g. `0.8.9+commit.e5eed63a`.
    pub solc_long_version: String,
    /// Standard-JSON compiler input.
    pub input: Value,
}

/// A compiled contract.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractArtifact {
    pub contract_name: String,
    /// Source file the contract was compiled from, e.g. `contracts/KYC.sol`.
    pub source_name: Option<String>,
    pub abi: JsonAbi,
    /// Creation bytecode, without constructor arguments.
    pub bytecode: Bytes,
    /// Where the artifact was read from.
    pub path: PathBuf,
}

impl ContractArtifact {
    /// Read an artifact file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        let raw: RawArtifact = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

        let contract_name = match raw.contract_name {
            Some(name) => name,
            None => path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Artifact file name is not valid UTF-8")?
                .to_string(),
        };

        let bytecode_hex = raw.bytecode.into_hex();
        if bytecode_hex.contains("__$") {
            anyhow::bail!(
                "{} requires library linking, which is not supported",
                contract_name
            );
        }
        let bytecode: Bytes = bytecode_hex
            .parse()
            .with_context(|| format!("Invalid bytecode in artifact {}", path.display()))?;
        if bytecode.is_empty() {
            anyhow::bail!(
                "{} has no bytecode (is it abstract or an interface?)",
                contract_name
            );
        }

        Ok(Self {
            contract_name,
            source_name: raw.source_name,
            abi: raw.abi,
            bytecode,
            path: path.to_path_buf(),
        })
    }

    /// Fully qualified name, `<source>:<contract>`, as expected by block explorers.
    pub fn fully_qualified_name(&self) -> String {
        match &self.source_name {
            Some(source) => format!("{}:{}", source, self.contract_name),
            None => self.contract_name.clone(),
        }
    }

    /// ABI-encode string constructor arguments against the constructor signature.
    pub fn encode_constructor(&self, args: &[String]) -> Result<Bytes> {
        let Some(constructor) = &self.abi.constructor else {
            if !args.is_empty() {
                anyhow::bail!(
                    "{} has no constructor but {} arguments were given",
                    self.contract_name,
                    args.len()
                );
            }
            return Ok(Bytes::new());
        };

        if constructor.inputs.len() != args.len() {
            anyhow::bail!(
                "{} constructor takes {} arguments, got {}",
                self.contract_name,
                constructor.inputs.len(),
                args.len()
            );
        }

        let values = coerce_args(&constructor.inputs, args, "constructor")?;

        let encoded = constructor
            .abi_encode_input(&values)
            .context("Failed to encode constructor arguments")?;
        Ok(encoded.into())
    }

    /// Creation bytecode followed by the encoded constructor arguments.
    pub fn creation_code(&self, args: &[String]) -> Result<Bytes> {
        let encoded = self.encode_constructor(args)?;
        let mut code = self.bytecode.to_vec();
        code.extend_from_slice(&encoded);
        Ok(code.into())
    }

    /// Build info recorded next to a Hardhat artifact.
    pub fn build_info(&self) -> Result<BuildInfo> {
        let debug_path = self.path.with_extension("dbg.json");
        let content = std::fs::read_to_string(&debug_path).with_context(|| {
            format!(
                "No build info for {} (expected {})",
                self.contract_name,
                debug_path.display()
            )
        })?;
        let debug: DebugFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", debug_path.display()))?;

        let build_info_path = debug_path
            .parent()
            .context("Artifact path has no parent directory")?
            .join(debug.build_info);
        let content = std::fs::read_to_string(&build_info_path)
            .with_context(|| format!("Failed to read build info {}", build_info_path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse build info {}", build_info_path.display()))
    }
}

/// Parse string arguments into ABI values of `params`.
///
/// `context` names the function in error messages.
pub(crate) fn coerce_args(
    params: &[Param],
    args: &[String],
    context: &str,
) -> Result<Vec<DynSolValue>> {
    if params.len() != args.len() {
        anyhow::bail!(
            "{} takes {} arguments, got {}",
            context,
            params.len(),
            args.len()
        );
    }

    params
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            let ty = param
                .resolve()
                .with_context(|| format!("Unsupported {} parameter {}", context, param.name))?;
            ty.coerce_str(arg).with_context(|| {
                format!(
                    "Invalid value '{}' for {} parameter {} ({})",
                    arg, context, param.name, param.ty
                )
            })
        })
        .collect()
}

/// Artifact directory of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the artifact of a contract.
    ///
    /// `name` is either a contract name (`KYC`) or `<source path>:<name>`
    /// (`contracts/KYC.sol:KYC`) when several sources declare the same name.
    pub fn find(&self, name: &str) -> Result<ContractArtifact> {
        let (source, contract) = match name.rsplit_once(':') {
            Some((source, contract)) => (Some(source), contract),
            None => (None, name),
        };

        if !self.root.is_dir() {
            anyhow::bail!(
                "Artifacts directory {} does not exist. Compile the contracts first.",
                self.root.display()
            );
        }

        let mut matches = Vec::new();
        collect_artifacts(&self.root, &format!("{}.json", contract), &mut matches)?;

        if let Some(source) = source {
            // Hardhat mirrors the source path; Foundry only keeps the file name.
            let exact: Vec<PathBuf> = matches
                .iter()
                .filter(|path| path.parent().is_some_and(|dir| dir.ends_with(source)))
                .cloned()
                .collect();
            if exact.is_empty() {
                let source_file = Path::new(source).file_name();
                matches.retain(|path| path.parent().and_then(|p| p.file_name()) == source_file);
            } else {
                matches = exact;
            }
        }

        match matches.as_slice() {
            [] => anyhow::bail!(
                "No artifact found for contract '{}' under {}",
                name,
                self.root.display()
            ),
            [path] => {
                tracing::debug!(contract = name, path = %path.display(), "Found artifact");
                ContractArtifact::load(path)
            }
            _ => anyhow::bail!(
                "Contract name '{}' is ambiguous, found: {}. Use <source>:<name>.",
                name,
                matches
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

fn collect_artifacts(dir: &Path, file_name: &str, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|n| n == BUILD_INFO_DIR) {
                continue;
            }
            collect_artifacts(&path, file_name, out)?;
        } else if path.file_name().is_some_and(|n| n == file_name) {
            out.push(path);
        }
    }

    out.sort();
    Ok(())
}
