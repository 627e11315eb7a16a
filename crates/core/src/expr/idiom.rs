use std::fmt;

use serde::{Deserialize, Serialize};

/// A dotted field path into a document, e.g. `address.city`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Idiom(pub Vec<String>);

impl Idiom {
	pub fn field(name: impl Into<String>) -> Self {
		Idiom(vec![name.into()])
	}

	pub fn parts(&self) -> &[String] {
		&self.0
	}
}

impl From<&str> for Idiom {
	fn from(path: &str) -> Self {
		Idiom(path.split('.').map(str::to_owned).collect())
	}
}

impl fmt::Display for Idiom {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut first = true;
		for part in &self.0 {
			if !first {
				f.write_str(".")?;
			}
			first = false;
			f.write_str(part)?;
		}
		Ok(())
	}
}
