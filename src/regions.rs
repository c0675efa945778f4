//! Billable region registry
//!
//! Source of truth for which regions can be ingested and billed. GovCloud
//! and China partitions are listed but not billable through the public
//! retail APIs.

use crate::model::CloudProvider;

/// A region a provider can bill in
#[derive(Debug, Clone)]
pub struct CloudRegion {
    pub provider: CloudProvider,
    pub region: &'static str,
    pub display_name: &'static str,
    pub billable: bool,
    /// "api" | "govcloud" | "china"
    pub pricing_source: &'static str,
}

/// All known regions for all providers
#[derive(Debug, Clone)]
pub struct RegionRegistry {
    regions: Vec<CloudRegion>,
}

impl Default for RegionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionRegistry {
    pub fn new() -> Self {
        let mut regions = Vec::new();
        regions.extend(aws_regions());
        regions.extend(azure_regions());
        regions.extend(gcp_regions());
        Self { regions }
    }

    pub fn billable_regions(&self, provider: CloudProvider) -> Vec<&CloudRegion> {
        self.regions
            .iter()
            .filter(|r| r.provider == provider && r.billable)
            .collect()
    }

    pub fn all_regions(&self, provider: CloudProvider) -> Vec<&CloudRegion> {
        self.regions
            .iter()
            .filter(|r| r.provider == provider)
            .collect()
    }

    pub fn get_region(&self, provider: CloudProvider, region: &str) -> Option<&CloudRegion> {
        self.regions
            .iter()
            .find(|r| r.provider == provider && r.region == region)
    }

    pub fn is_billable(&self, provider: CloudProvider, region: &str) -> bool {
        self.get_region(provider, region)
            .is_some_and(|r| r.billable)
    }
}

fn aws(region: &'static str, display_name: &'static str, billable: bool, source: &'static str) -> CloudRegion {
    CloudRegion {
        provider: CloudProvider::Aws,
        region,
        display_name,
        billable,
        pricing_source: source,
    }
}

fn aws_regions() -> Vec<CloudRegion> {
    vec![
        aws("us-east-1", "US East (N. Virginia)", true, "api"),
        aws("us-east-2", "US East (Ohio)", true, "api"),
        aws("us-west-1", "US West (N. California)", true, "api"),
        aws("us-west-2", "US West (Oregon)", true, "api"),
        aws("ca-central-1", "Canada (Central)", true, "api"),
        aws("eu-west-1", "Europe (Ireland)", true, "api"),
        aws("eu-west-2", "Europe (London)", true, "api"),
        aws("eu-west-3", "Europe (Paris)", true, "api"),
        aws("eu-central-1", "Europe (Frankfurt)", true, "api"),
        aws("eu-north-1", "Europe (Stockholm)", true, "api"),
        aws("ap-southeast-1", "Asia Pacific (Singapore)", true, "api"),
        aws("ap-southeast-2", "Asia Pacific (Sydney)", true, "api"),
        aws("ap-northeast-1", "Asia Pacific (Tokyo)", true, "api"),
        aws("ap-northeast-2", "Asia Pacific (Seoul)", true, "api"),
        aws("ap-south-1", "Asia Pacific (Mumbai)", true, "api"),
        aws("sa-east-1", "South America (São Paulo)", true, "api"),
        aws("us-gov-west-1", "AWS GovCloud (US-West)", false, "govcloud"),
        aws("us-gov-east-1", "AWS GovCloud (US-East)", false, "govcloud"),
        aws("cn-north-1", "China (Beijing)", false, "china"),
        aws("cn-northwest-1", "China (Ningxia)", false, "china"),
    ]
}

fn azure(region: &'static str, display_name: &'static str) -> CloudRegion {
    CloudRegion {
        provider: CloudProvider::Azure,
        region,
        display_name,
        billable: true,
        pricing_source: "api",
    }
}

fn azure_regions() -> Vec<CloudRegion> {
    vec![
        azure("eastus", "East US"),
        azure("eastus2", "East US 2"),
        azure("westus", "West US"),
        azure("westus2", "West US 2"),
        azure("westus3", "West US 3"),
        azure("centralus", "Central US"),
        azure("canadacentral", "Canada Central"),
        azure("northeurope", "North Europe"),
        azure("westeurope", "West Europe"),
        azure("uksouth", "UK South"),
        azure("francecentral", "France Central"),
        azure("germanywestcentral", "Germany West Central"),
        azure("swedencentral", "Sweden Central"),
        azure("eastasia", "East Asia"),
        azure("southeastasia", "Southeast Asia"),
        azure("australiaeast", "Australia East"),
        azure("japaneast", "Japan East"),
        azure("koreacentral", "Korea Central"),
        azure("centralindia", "Central India"),
        azure("brazilsouth", "Brazil South"),
    ]
}

fn gcp(region: &'static str, display_name: &'static str) -> CloudRegion {
    CloudRegion {
        provider: CloudProvider::Gcp,
        region,
        display_name,
        billable: true,
        pricing_source: "api",
    }
}

fn gcp_regions() -> Vec<CloudRegion> {
    vec![
        gcp("us-central1", "Iowa"),
        gcp("us-east1", "South Carolina"),
        gcp("us-east4", "Northern Virginia"),
        gcp("us-west1", "Oregon"),
        gcp("us-west2", "Los Angeles"),
        gcp("northamerica-northeast1", "Montréal"),
        gcp("southamerica-east1", "São Paulo"),
        gcp("europe-west1", "Belgium"),
        gcp("europe-west2", "London"),
        gcp("europe-west3", "Frankfurt"),
        gcp("europe-west4", "Netherlands"),
        gcp("europe-north1", "Finland"),
        gcp("asia-east1", "Taiwan"),
        gcp("asia-northeast1", "Tokyo"),
        gcp("asia-south1", "Mumbai"),
        gcp("asia-southeast1", "Singapore"),
        gcp("australia-southeast1", "Sydney"),
        gcp("global", "Global"),
    ]
}
