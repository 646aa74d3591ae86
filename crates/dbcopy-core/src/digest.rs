//! MD5 digests identifying runs and value sets across databases.

use md5::{Digest, Md5};

use crate::format::DoubleFormat;
use crate::run::RunStatus;

#[must_use]
pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", Md5::digest(bytes))
}

/// Digest of run metadata; changes when the run is renamed.
#[must_use]
pub fn run_meta_digest(
    model_digest: &str,
    run_name: &str,
    sub_count: i32,
    create_dt: &str,
    run_stamp: &str,
) -> String {
    let text = format!(
        "model_digest,run_name,sub_count,create_dt,run_stamp\n{model_digest},{run_name},{sub_count},{create_dt},{run_stamp}\n"
    );
    md5_hex(text.as_bytes())
}

/// Digest of run values: parameter value digests in parameter id order and,
/// for successful runs only, table value digests in table id order. An empty
/// digest contributes a blank line.
#[must_use]
pub fn run_value_digest<'a>(
    sub_count: i32,
    sub_completed: i32,
    status: RunStatus,
    param_digests: impl IntoIterator<Item = &'a str>,
    table_digests: impl IntoIterator<Item = &'a str>,
) -> String {
    let mut hasher = Md5::new();
    hasher.update(format!("sub_count,sub_completed,status\n{sub_count},{sub_completed},{status}\n"));
    hasher.update(b"value_digest\n");
    for d in param_digests {
        hasher.update(d.as_bytes());
        hasher.update(b"\n");
    }
    if status == RunStatus::Success {
        for d in table_digests {
            hasher.update(d.as_bytes());
            hasher.update(b"\n");
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Incremental digest of a value stream: a header identifying the artifact,
/// then one canonical CSV line per row in cursor order.
pub struct ValueDigester {
    hasher: Md5,
    fmt: DoubleFormat,
    rows: usize,
}

impl ValueDigester {
    /// Parameter values: `sub_id,dim0..,param_value`.
    #[must_use]
    pub fn param(name: &str, digest: &str, rank: usize) -> Self {
        let mut d = Self::start(name, digest);
        let mut header = String::from("sub_id");
        for k in 0..rank {
            header.push_str(&format!(",dim{k}"));
        }
        header.push_str(",param_value\n");
        d.hasher.update(header.as_bytes());
        d
    }

    /// Output table values; expression and accumulator sections are started
    /// with [`ValueDigester::begin_section`].
    #[must_use]
    pub fn table(name: &str, digest: &str) -> Self {
        Self::start(name, digest)
    }

    /// Microdata values: `entity_key,attr..`.
    #[must_use]
    pub fn entity(name: &str, digest: &str, attr_names: &[String]) -> Self {
        let mut d = Self::start(name, digest);
        let mut header = String::from("entity_key");
        for a in attr_names {
            header.push(',');
            header.push_str(a);
        }
        header.push('\n');
        d.hasher.update(header.as_bytes());
        d
    }

    fn start(name: &str, digest: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(format!("name,digest\n{name},{digest}\n"));
        Self { hasher, fmt: DoubleFormat::default(), rows: 0 }
    }

    pub fn begin_section(&mut self, header: &str) {
        self.hasher.update(header.as_bytes());
        self.hasher.update(b"\n");
    }

    pub fn push_fields<S: AsRef<str>>(&mut self, fields: &[S]) {
        for (k, f) in fields.iter().enumerate() {
            if k > 0 {
                self.hasher.update(b",");
            }
            self.hasher.update(f.as_ref().as_bytes());
        }
        self.hasher.update(b"\n");
        self.rows += 1;
    }

    #[must_use]
    pub fn float(&self, value: Option<f64>) -> String {
        value.map_or_else(|| "null".to_string(), |v| self.fmt.format(v))
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn run_meta_digest_hashes_documented_bytes() {
        let expected = md5_hex(
            b"model_digest,run_name,sub_count,create_dt,run_stamp\nabc,my run,2,2024-01-01 10:00:00.000,2024_01_01_10_00_00_000\n",
        );
        assert_eq!(
            run_meta_digest("abc", "my run", 2, "2024-01-01 10:00:00.000", "2024_01_01_10_00_00_000"),
            expected
        );
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn value_digest_omits_tables_unless_success() {
        let s = run_value_digest(1, 1, RunStatus::Success, ["p0", ""], ["t0"]);
        let expected = md5_hex(b"sub_count,sub_completed,status\n1,1,s\nvalue_digest\np0\n\nt0\n");
        assert_eq!(s, expected);

        let e = run_value_digest(1, 1, RunStatus::Error, ["p0", ""], ["t0"]);
        let expected = md5_hex(b"sub_count,sub_completed,status\n1,1,e\nvalue_digest\np0\n\n");
        assert_eq!(e, expected);
    }

    #[test]
    fn value_digester_depends_on_row_order() {
        let mut a = ValueDigester::param("ageSex", "d", 1);
        a.push_fields(&["0", "10", "1.5"]);
        a.push_fields(&["0", "20", "2"]);
        let mut b = ValueDigester::param("ageSex", "d", 1);
        b.push_fields(&["0", "20", "2"]);
        b.push_fields(&["0", "10", "1.5"]);
        assert_eq!(a.rows(), 2);
        assert_ne!(a.finish(), b.finish());
    }

    proptest! {
        #[test]
        fn run_meta_digest_is_deterministic(name in "[a-zA-Z0-9 _]{0,40}", sub in 0..1000_i32) {
            let a = run_meta_digest("m", &name, sub, "dt", "st");
            let b = run_meta_digest("m", &name, sub, "dt", "st");
            prop_assert_eq!(a.len(), 32);
            prop_assert_eq!(a, b);
        }
    }
}
