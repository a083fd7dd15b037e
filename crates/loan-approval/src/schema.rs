//! Ordered feature schema shared by the normalizer and the model artifacts.
//!
//! The classifiers were trained on vectors in exactly this order, so the field list is
//! load-bearing. Every artifact carries a copy of the schema version and feature names, and the
//! loader refuses artifacts whose copy disagrees with [`FEATURE_SCHEMA`].

/// Encoding applied to a field's raw JSON value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// 1 when the lowercased text is one of `truthy`, otherwise 0. Never fails.
    Flag { truthy: &'static [&'static str] },
    /// Trimmed text; an empty value becomes `default`.
    Count { default: &'static str },
    /// Floating point value.
    Numeric,
    /// Urban = 2, Semiurban = 1, anything else = 0.
    Area,
}

/// What to do with a present value that cannot be parsed for its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnParseFail {
    UseDefault,
    Reject,
}

/// Presence and parse policy for a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPolicy {
    pub required: bool,
    pub on_parse_fail: OnParseFail,
}

impl FieldPolicy {
    /// Key must be present; malformed values fall back to the kind's default.
    pub const TOLERANT: Self = Self {
        required: true,
        on_parse_fail: OnParseFail::UseDefault,
    };

    /// Key must be present and its value must parse.
    pub const STRICT: Self = Self {
        required: true,
        on_parse_fail: OnParseFail::Reject,
    };

    /// Key may be omitted; absence and malformed values both fall back to the default.
    pub const OPTIONAL: Self = Self {
        required: false,
        on_parse_fail: OnParseFail::UseDefault,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub policy: FieldPolicy,
}

impl FieldSpec {
    pub const fn tolerant(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            policy: FieldPolicy::TOLERANT,
        }
    }
}

/// Versioned, ordered list of fields the models consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSchema {
    pub version: &'static str,
    pub fields: &'static [FieldSpec],
}

impl FeatureSchema {
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|field| field.name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// True when `version` and `names` describe this schema exactly, order included.
    pub fn matches<S: AsRef<str>>(&self, version: &str, names: &[S]) -> bool {
        version == self.version
            && names.len() == self.fields.len()
            && self
                .names()
                .zip(names)
                .all(|(expected, found)| expected == found.as_ref())
    }
}

const GENDER_TRUTHY: &[&str] = &["male", "1", "yes"];
const MARRIED_TRUTHY: &[&str] = &["yes", "1", "married"];
const EDUCATION_TRUTHY: &[&str] = &["graduate", "1", "yes"];
const SELF_EMPLOYED_TRUTHY: &[&str] = &["yes", "1"];

pub static FEATURE_SCHEMA: FeatureSchema = FeatureSchema {
    version: "loan-v1",
    fields: &[
        FieldSpec::tolerant("Gender", FieldKind::Flag { truthy: GENDER_TRUTHY }),
        FieldSpec::tolerant("Married", FieldKind::Flag { truthy: MARRIED_TRUTHY }),
        FieldSpec::tolerant("Dependents", FieldKind::Count { default: "0" }),
        FieldSpec::tolerant("Education", FieldKind::Flag { truthy: EDUCATION_TRUTHY }),
        FieldSpec::tolerant(
            "Self_Employed",
            FieldKind::Flag {
                truthy: SELF_EMPLOYED_TRUTHY,
            },
        ),
        FieldSpec::tolerant("ApplicantIncome", FieldKind::Numeric),
        FieldSpec::tolerant("CoapplicantIncome", FieldKind::Numeric),
        FieldSpec::tolerant("LoanAmount", FieldKind::Numeric),
        FieldSpec::tolerant("Loan_Amount_Term", FieldKind::Numeric),
        FieldSpec::tolerant("Credit_History", FieldKind::Numeric),
        FieldSpec::tolerant("Property_Area", FieldKind::Area),
    ],
};
