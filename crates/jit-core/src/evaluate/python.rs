//! CPython-backed evaluation.
//!
//! Every load and every predicate runs in a fresh interpreter: the unit is
//! executed inside a throwaway module, the target symbol is looked up, and
//! the predicate (a Python callable expression such as
//! `lambda f: f(100) == [2, 2, 5, 5]`) is applied to it. The exit status
//! carries the verdict. There is no sandbox.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::{debug, warn};

use crate::evaluate::{CandidateEvaluator, CompileError};
use crate::models::{TestOutcome, TestPredicate};

// An uncaught exception exits with 1, so a false verdict needs its own code.
const EXIT_PASSED: i32 = 0;
const EXIT_FAILED: i32 = 10;

/// Build the driver script that loads `unit` and runs `body` against the
/// bound `symbol`, which is available to `body` as `__jit_target__`.
fn harness(unit: &str, symbol: &str, body: &str) -> Result<String, CompileError> {
    let unit_literal =
        serde_json::to_string(unit).map_err(|e| CompileError::new(e.to_string()))?;
    let symbol_literal =
        serde_json::to_string(symbol).map_err(|e| CompileError::new(e.to_string()))?;
    Ok(format!(
        "import sys\n\
         import types\n\
         __jit_module__ = types.ModuleType(\"__jit_candidate__\")\n\
         sys.modules[\"__jit_candidate__\"] = __jit_module__\n\
         exec(compile({unit_literal}, \"<candidate>\", \"exec\"), __jit_module__.__dict__)\n\
         if not hasattr(__jit_module__, {symbol_literal}):\n    \
             sys.stderr.write(\"NameError: name \" + repr({symbol_literal}) + \" is not defined by the candidate\\n\")\n    \
             sys.exit(3)\n\
         __jit_target__ = getattr(__jit_module__, {symbol_literal})\n\
         {body}\n"
    ))
}

/// Trimmed stderr of an abnormal exit, normally a Python traceback.
fn summarize_stderr(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "candidate exited abnormally".to_string();
    }
    trimmed.to_string()
}

fn run_script(interpreter: &Path, script: &str) -> Result<Output, CompileError> {
    let mut file = tempfile::Builder::new()
        .prefix("jit_harness")
        .suffix(".py")
        .tempfile()
        .map_err(|e| CompileError::new(e.to_string()))?;
    file.write_all(script.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| CompileError::new(e.to_string()))?;

    Command::new(interpreter)
        .arg(file.path())
        .output()
        .map_err(|e| CompileError::new(format!("cannot run {}: {e}", interpreter.display())))
}

/// A successfully loaded candidate, re-executed for each predicate.
#[derive(Clone, Debug)]
pub struct PythonUnit {
    pub source: String,
    pub symbol: String,
    interpreter: PathBuf,
}

impl PythonUnit {
    /// Apply the callable expression `predicate` to the symbol. `Ok(true)`
    /// only when it returns a truthy value; a raised exception is an `Err`
    /// carrying the traceback.
    pub fn apply(&self, predicate: &str) -> Result<bool, CompileError> {
        let body = format!(
            "sys.exit({EXIT_PASSED} if ({predicate})(__jit_target__) else {EXIT_FAILED})"
        );
        let output = run_script(&self.interpreter, &harness(&self.source, &self.symbol, &body)?)?;
        match output.status.code() {
            Some(EXIT_PASSED) => Ok(true),
            Some(EXIT_FAILED) => Ok(false),
            _ => Err(CompileError::new(summarize_stderr(&output.stderr))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PythonEvaluator {
    interpreter: PathBuf,
}

impl Default for PythonEvaluator {
    fn default() -> Self {
        Self::new("python3")
    }
}

impl PythonEvaluator {
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

impl CandidateEvaluator for PythonEvaluator {
    type Output = PythonUnit;

    fn load(&self, unit: &str, symbol: &str) -> Result<PythonUnit, CompileError> {
        let output = run_script(&self.interpreter, &harness(unit, symbol, "")?)?;
        if !output.status.success() {
            return Err(CompileError::new(summarize_stderr(&output.stderr)));
        }
        debug!("Loaded {symbol} from candidate unit");
        Ok(PythonUnit {
            source: unit.to_string(),
            symbol: symbol.to_string(),
            interpreter: self.interpreter.clone(),
        })
    }
}

/// A test written as a Python callable expression taking the synthesized
/// object, e.g. `lambda f: f([1, 2, 3], 2) == [[1, 2], [2, 3]]`.
#[derive(Clone, Debug)]
pub struct PythonPredicate {
    expression: String,
    description: String,
}

impl PythonPredicate {
    pub fn new(expression: impl Into<String>) -> Self {
        let expression = expression.into();
        Self {
            description: expression.clone(),
            expression,
        }
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl TestPredicate<PythonUnit> for PythonPredicate {
    fn source(&self) -> &str {
        &self.expression
    }

    fn check(&self, target: &PythonUnit) -> TestOutcome {
        match target.apply(&self.expression) {
            Ok(passed) => TestOutcome::new(passed, self.description.clone()),
            Err(e) => {
                warn!("Test `{}` raised: {e}", self.description);
                TestOutcome::new(false, format!("{} (raised {e})", self.description))
            }
        }
    }
}
