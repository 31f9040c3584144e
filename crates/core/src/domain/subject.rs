use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chat-provider identity of an end user (the provider's phone identity).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(pub String);

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberType {
    Principal,
    Dependent,
}

impl MemberType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Principal => "Principal member",
            Self::Dependent => "Dependent",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Principal member" => Some(Self::Principal),
            "Dependent" => Some(Self::Dependent),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicalAidProvider {
    DiscoveryHealth,
    Bonitas,
    MomentumHealth,
    PrivateClient,
}

impl MedicalAidProvider {
    pub fn label(&self) -> &'static str {
        match self {
            Self::DiscoveryHealth => "Discovery Health",
            Self::Bonitas => "Bonitas",
            Self::MomentumHealth => "Momentum Health",
            Self::PrivateClient => "Private Client",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Discovery Health" => Some(Self::DiscoveryHealth),
            "Bonitas" => Some(Self::Bonitas),
            "Momentum Health" => Some(Self::MomentumHealth),
            "Private Client" => Some(Self::PrivateClient),
            _ => None,
        }
    }
}

/// Long-lived profile of a registered end user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub member_type: MemberType,
    pub dependent_number: String,
    pub medical_aid_provider: MedicalAidProvider,
    pub medical_aid_number: Option<String>,
    pub medical_aid_plan: Option<String>,
    pub registration_complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependentId(pub String);

impl DependentId {
    pub fn generate() -> Self {
        Self(format!("DEP-{}", Uuid::new_v4()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dependent {
    pub id: DependentId,
    pub subject_id: SubjectId,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub dependent_number: String,
    pub created_at: DateTime<Utc>,
}

impl Dependent {
    /// Display label used in numbered choice lists and roster messages.
    pub fn label(&self) -> String {
        format!("{} {} ({})", self.first_name, self.last_name, self.dependent_number)
    }
}

#[cfg(test)]
mod tests {
    use super::{MedicalAidProvider, MemberType};

    #[test]
    fn member_type_labels_round_trip() {
        for member_type in [MemberType::Principal, MemberType::Dependent] {
            assert_eq!(MemberType::from_label(member_type.label()), Some(member_type));
        }
        assert_eq!(MemberType::from_label("principal member"), None);
    }

    #[test]
    fn provider_labels_round_trip() {
        for provider in [
            MedicalAidProvider::DiscoveryHealth,
            MedicalAidProvider::Bonitas,
            MedicalAidProvider::MomentumHealth,
            MedicalAidProvider::PrivateClient,
        ] {
            assert_eq!(MedicalAidProvider::from_label(provider.label()), Some(provider));
        }
    }
}
