use crate::cmake::error::{CMakeError, CMakeResult};
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use tokio::process::Command;

/// One component of a dotted version string
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum VersionPart {
    // Declaration order matters: alphabetic parts sort before numeric parts
    Alpha(String),
    Num(u64),
}

/// Version that compares component-wise like the host build tool does
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    parts: Vec<VersionPart>,
}

impl Version {
    pub fn parse(raw: &str) -> Self {
        let mut parts = Vec::new();
        let mut chars = raw.chars().peekable();

        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() {
                let mut digits = String::new();
                while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                    digits.push(d);
                    chars.next();
                }
                // Absurdly long numbers still compare greater than anything sane
                parts.push(VersionPart::Num(digits.parse().unwrap_or(u64::MAX)));
            } else if c.is_ascii_alphabetic() {
                let mut word = String::new();
                while let Some(&a) = chars.peek().filter(|a| a.is_ascii_alphabetic()) {
                    word.push(a);
                    chars.next();
                }
                parts.push(VersionPart::Alpha(word));
            } else {
                chars.next();
            }
        }

        Self { parts }
    }
}

/// Compare `version` against a condition such as `>=3.14` or `<1.2`
///
/// A condition without an operator means equality.
pub fn version_compare(version: &str, condition: &str) -> bool {
    const OPERATORS: &[&str] = &[">=", "<=", "!=", "==", "=", ">", "<"];

    let (op, rest) = OPERATORS
        .iter()
        .find_map(|op| condition.strip_prefix(op).map(|rest| (*op, rest)))
        .unwrap_or(("==", condition));

    let ord = Version::parse(version.trim()).cmp(&Version::parse(rest.trim()));
    match op {
        ">=" => ord != Ordering::Less,
        "<=" => ord != Ordering::Greater,
        "!=" => ord != Ordering::Equal,
        ">" => ord == Ordering::Greater,
        "<" => ord == Ordering::Less,
        _ => ord == Ordering::Equal,
    }
}

/// Version of a CMake executable as printed by `cmake --version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CMakeVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub suffix: Option<String>,
    raw: String,
}

impl CMakeVersion {
    /// Detect the version by running `<cmake> --version`
    pub async fn detect(cmake_path: &Path) -> CMakeResult<Self> {
        let output = Command::new(cmake_path)
            .arg("--version")
            .output()
            .await
            .map_err(|e| CMakeError::NotFound(format!("{}: {e}", cmake_path.display())))?;

        if !output.status.success() {
            return Err(CMakeError::NotFound(format!(
                "{} --version failed",
                cmake_path.display()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Self::parse_version_output(&stdout)
    }

    pub fn parse_version_output(output: &str) -> CMakeResult<Self> {
        // "cmake version 3.16.3" possibly followed by a vendor line
        let first_line = output.lines().next().unwrap_or("");
        let raw = first_line
            .trim()
            .strip_prefix("cmake version")
            .or_else(|| first_line.trim().strip_prefix("cmake3 version"))
            .ok_or_else(|| CMakeError::VersionParse(first_line.to_string()))?
            .trim()
            .to_string();

        let (numbers, suffix) = match raw.split_once('-') {
            Some((numbers, suffix)) => (numbers, Some(suffix.to_string())),
            None => (raw.as_str(), None),
        };

        let mut dot_parts = numbers.splitn(3, '.');
        let mut next_number = |required: bool| -> CMakeResult<u32> {
            match dot_parts.next() {
                Some(part) => {
                    let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                    digits
                        .parse()
                        .map_err(|_| CMakeError::VersionParse(raw.clone()))
                }
                None if required => Err(CMakeError::VersionParse(raw.clone())),
                None => Ok(0),
            }
        };

        let major = next_number(true)?;
        let minor = next_number(true)?;
        let patch = next_number(false)?;

        Ok(Self {
            major,
            minor,
            patch,
            suffix,
            raw,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn satisfies(&self, condition: &str) -> bool {
        version_compare(&self.raw, condition)
    }

    /// The file API replaces the server protocol starting with 3.14
    pub fn supports_file_api(&self) -> bool {
        self.satisfies(">=3.14")
    }

    /// Name of the variable used to inject the preload script
    pub fn preload_variable(&self) -> &'static str {
        if self.satisfies(">=3.15") {
            "CMAKE_PROJECT_INCLUDE_BEFORE"
        } else {
            "CMAKE_PROJECT_INCLUDE"
        }
    }
}

impl fmt::Display for CMakeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compare_operators() {
        assert!(version_compare("1.2", "<1.3"));
        assert!(!version_compare("1.3", "<1.2"));
        assert!(version_compare("3.14.0", ">=3.14"));
        assert!(version_compare("3.7", ">=3.7"));
        assert!(!version_compare("3.6.9", ">=3.7"));
        assert!(version_compare("2.0", "=2.0"));
        assert!(version_compare("2.0", "==2.0"));
        assert!(version_compare("2.0", "2.0"));
        assert!(version_compare("2.0", "!=2.1"));
        assert!(version_compare("1.10", ">1.9"));
        assert!(version_compare("1.2", "<=1.2"));
    }

    #[test]
    fn test_version_alpha_ordering() {
        // Alphabetic components sort before numeric ones
        assert!(version_compare("1.0rc1", "<1.0.1"));
        // A trailing component makes the version greater
        assert!(version_compare("1.0.0", ">1.0"));
    }

    #[test]
    fn test_parse_cmake_version_output() {
        let version = CMakeVersion::parse_version_output(
            "cmake version 3.16.3\n\nCMake suite maintained and supported by Kitware (kitware.com/cmake).\n",
        )
        .unwrap();
        assert_eq!((version.major, version.minor, version.patch), (3, 16, 3));
        assert_eq!(version.suffix, None);
        assert!(version.supports_file_api());
        assert_eq!(version.preload_variable(), "CMAKE_PROJECT_INCLUDE_BEFORE");
    }

    #[test]
    fn test_parse_cmake_version_with_suffix() {
        let version = CMakeVersion::parse_version_output("cmake version 3.13.0-rc2\n").unwrap();
        assert_eq!((version.major, version.minor, version.patch), (3, 13, 0));
        assert_eq!(version.suffix.as_deref(), Some("rc2"));
        assert!(!version.supports_file_api());
        assert_eq!(version.preload_variable(), "CMAKE_PROJECT_INCLUDE");
    }

    #[test]
    fn test_parse_cmake_version_garbage() {
        assert!(CMakeVersion::parse_version_output("not cmake at all").is_err());
        assert!(CMakeVersion::parse_version_output("").is_err());
    }
}
