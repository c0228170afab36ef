//! Directory listings: the schema, validation, and the CSV-file backend
//! that stands in for the relational store behind [`ListingStore`].

use crate::eid::Eid;
use crate::errors::Issue;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt::Display,
    io::ErrorKind,
    str::FromStr,
    sync::{Arc, RwLock},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Restaurant,
    Store,
    Service,
    Technology,
    Healthcare,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Restaurant,
        Category::Store,
        Category::Service,
        Category::Technology,
        Category::Healthcare,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Restaurant => "restaurant",
            Category::Store => "store",
            Category::Service => "service",
            Category::Technology => "technology",
            Category::Healthcare => "healthcare",
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restaurant" => Ok(Category::Restaurant),
            "store" => Ok(Category::Store),
            "service" => Ok(Category::Service),
            "technology" => Ok(Category::Technology),
            "healthcare" => Ok(Category::Healthcare),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: Eid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub address: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub category: Category,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employees: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub founded: Option<i32>,

    /// Not part of the wire shape; persisted as JSON text in the store.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raw listing submission. Every field is optional so that missing
/// required fields surface as structured validation issues rather than a
/// body-deserialization failure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingCreate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub email: Option<String>,
    pub category: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub rating: Option<f64>,
    pub employees: Option<String>,
    pub founded: Option<i32>,
}

/// A submission that passed validation.
#[derive(Debug, Clone)]
pub struct NewListing {
    pub name: String,
    pub description: Option<String>,
    pub address: String,
    pub phone: String,
    pub website: Option<String>,
    pub email: Option<String>,
    pub category: Category,
    pub latitude: f64,
    pub longitude: f64,
    pub rating: Option<f64>,
    pub employees: Option<String>,
    pub founded: Option<i32>,
}

fn is_wellformed_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

impl ListingCreate {
    /// Validate against the listing schema. Returns the typed submission
    /// or the full set of field issues.
    pub fn validate(self) -> Result<NewListing, Vec<Issue>> {
        let mut issues = vec![];

        let name = match self.name.filter(|n| !n.trim().is_empty()) {
            Some(name) => name,
            None => {
                issues.push(Issue::new("name", "name is required"));
                String::new()
            }
        };
        let address = match self.address.filter(|a| !a.trim().is_empty()) {
            Some(address) => address,
            None => {
                issues.push(Issue::new("address", "address is required"));
                String::new()
            }
        };
        let phone = match self.phone.filter(|p| !p.trim().is_empty()) {
            Some(phone) => phone,
            None => {
                issues.push(Issue::new("phone", "phone is required"));
                String::new()
            }
        };

        let category = match self.category.as_deref().map(Category::from_str) {
            Some(Ok(category)) => category,
            Some(Err(())) => {
                issues.push(Issue::new(
                    "category",
                    "category must be one of restaurant, store, service, technology, healthcare",
                ));
                Category::Service
            }
            None => {
                issues.push(Issue::new("category", "category is required"));
                Category::Service
            }
        };

        let latitude = match self.latitude {
            Some(lat) => lat,
            None => {
                issues.push(Issue::new("latitude", "latitude is required"));
                0.0
            }
        };
        let longitude = match self.longitude {
            Some(lon) => lon,
            None => {
                issues.push(Issue::new("longitude", "longitude is required"));
                0.0
            }
        };

        if let Some(website) = self.website.as_deref() {
            if url::Url::parse(website).is_err() {
                issues.push(Issue::new("website", "website must be a well-formed URL"));
            }
        }
        if let Some(email) = self.email.as_deref() {
            if !is_wellformed_email(email) {
                issues.push(Issue::new("email", "email must be a well-formed address"));
            }
        }
        if let Some(rating) = self.rating {
            if !(0.0..=5.0).contains(&rating) {
                issues.push(Issue::new("rating", "rating must be between 0 and 5"));
            }
        }

        if !issues.is_empty() {
            return Err(issues);
        }

        Ok(NewListing {
            name,
            description: self.description,
            address,
            phone,
            website: self.website,
            email: self.email,
            category,
            latitude,
            longitude,
            rating: self.rating,
            employees: self.employees,
            founded: self.founded,
        })
    }
}

/// Admin-side partial update.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub email: Option<String>,
    pub rating: Option<f64>,
}

impl ListingUpdate {
    /// Fields present in a partial update pass the same checks the
    /// create path applies, so both write paths accept the same values.
    pub fn validate(self) -> Result<ListingUpdate, Vec<Issue>> {
        let mut issues = vec![];

        if let Some(name) = self.name.as_deref() {
            if name.trim().is_empty() {
                issues.push(Issue::new("name", "name must not be blank"));
            }
        }
        if let Some(address) = self.address.as_deref() {
            if address.trim().is_empty() {
                issues.push(Issue::new("address", "address must not be blank"));
            }
        }
        if let Some(phone) = self.phone.as_deref() {
            if phone.trim().is_empty() {
                issues.push(Issue::new("phone", "phone must not be blank"));
            }
        }
        if let Some(website) = self.website.as_deref() {
            if url::Url::parse(website).is_err() {
                issues.push(Issue::new("website", "website must be a well-formed URL"));
            }
        }
        if let Some(email) = self.email.as_deref() {
            if !is_wellformed_email(email) {
                issues.push(Issue::new("email", "email must be a well-formed address"));
            }
        }
        if let Some(rating) = self.rating {
            if !(0.0..=5.0).contains(&rating) {
                issues.push(Issue::new("rating", "rating must be between 0 and 5"));
            }
        }

        if !issues.is_empty() {
            return Err(issues);
        }
        Ok(self)
    }
}

pub trait ListingStore: Send + Sync {
    /// All listings newest-first, optionally filtered by a case-insensitive
    /// substring over name/description/category/address.
    fn search(&self, filter: Option<&str>) -> anyhow::Result<Vec<Listing>>;
    fn get(&self, id: &Eid) -> anyhow::Result<Option<Listing>>;
    fn create(&self, listing: NewListing) -> anyhow::Result<Listing>;
    fn update(&self, id: &Eid, update: ListingUpdate) -> anyhow::Result<Option<Listing>>;
    /// Returns whether a listing was actually removed.
    fn delete(&self, id: &Eid) -> anyhow::Result<bool>;
    fn set_embedding(&self, id: &Eid, embedding: Vec<f32>) -> anyhow::Result<()>;
    /// Listings carrying a stored embedding, for similarity ranking.
    fn embedded(&self) -> anyhow::Result<Vec<Listing>>;
}

pub fn matches_filter(listing: &Listing, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    listing.name.to_lowercase().contains(&needle)
        || listing
            .description
            .as_deref()
            .map(|d| d.to_lowercase().contains(&needle))
            .unwrap_or(false)
        || listing.category.as_str().contains(&needle)
        || listing.address.to_lowercase().contains(&needle)
}

#[derive(Debug, Clone, Default)]
pub struct BackendCsv {
    list: Arc<RwLock<Vec<Listing>>>,
    path: String,
}

const CSV_HEADERS: [&str; 16] = [
    "id",
    "name",
    "description",
    "address",
    "phone",
    "website",
    "email",
    "category",
    "latitude",
    "longitude",
    "rating",
    "employees",
    "founded",
    "embedding",
    "created_at",
    "updated_at",
];

fn opt_str(record: &csv::StringRecord, idx: usize) -> Option<String> {
    record
        .get(idx)
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

fn req_str(record: &csv::StringRecord, idx: usize) -> anyhow::Result<String> {
    Ok(record
        .get(idx)
        .ok_or_else(|| anyhow!("couldnt get column {} ({})", idx, CSV_HEADERS[idx]))?
        .to_string())
}

impl BackendCsv {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if let Err(err) = std::fs::metadata(path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("Creating new listings database at {path}");
                    let mut csv_wrt = csv::Writer::from_path(path)?;
                    csv_wrt.write_record(CSV_HEADERS)?;
                    csv_wrt.flush()?;
                }
                _ => Err(err)?,
            }
        }

        let mut csv_reader = csv::Reader::from_path(path)?;

        let mut listings = vec![];
        for record in csv_reader.records() {
            let record = record?;

            let category = req_str(&record, 7)?;
            let category = Category::from_str(&category)
                .map_err(|_| anyhow!("unknown category \"{category}\" in store"))?;

            let embedding = match opt_str(&record, 13) {
                Some(raw) => Some(serde_json::from_str::<Vec<f32>>(&raw)?),
                None => None,
            };

            let listing = Listing {
                id: Eid::from(req_str(&record, 0)?),
                name: req_str(&record, 1)?,
                description: opt_str(&record, 2),
                address: req_str(&record, 3)?,
                phone: req_str(&record, 4)?,
                website: opt_str(&record, 5),
                email: opt_str(&record, 6),
                category,
                latitude: req_str(&record, 8)?.parse()?,
                longitude: req_str(&record, 9)?.parse()?,
                rating: opt_str(&record, 10).map(|v| v.parse()).transpose()?,
                employees: opt_str(&record, 11),
                founded: opt_str(&record, 12).map(|v| v.parse()).transpose()?,
                embedding,
                created_at: DateTime::parse_from_rfc3339(&req_str(&record, 14)?)?.with_timezone(&Utc),
                updated_at: DateTime::parse_from_rfc3339(&req_str(&record, 15)?)?.with_timezone(&Utc),
            };

            listings.push(listing);
        }

        Ok(BackendCsv {
            list: Arc::new(RwLock::new(listings)),
            path: path.to_string(),
        })
    }

    fn save(&self) -> anyhow::Result<()> {
        let listings = self.list.read().map_err(|_| anyhow!("listings lock poisoned"))?;

        let temp_path = format!("{}-tmp", &self.path);
        let mut csv_wrt = csv::Writer::from_path(&temp_path)?;
        csv_wrt.write_record(CSV_HEADERS)?;
        for listing in listings.iter() {
            let embedding = match &listing.embedding {
                Some(vector) => serde_json::to_string(vector)?,
                None => String::new(),
            };
            csv_wrt.write_record([
                listing.id.to_string(),
                listing.name.clone(),
                listing.description.clone().unwrap_or_default(),
                listing.address.clone(),
                listing.phone.clone(),
                listing.website.clone().unwrap_or_default(),
                listing.email.clone().unwrap_or_default(),
                listing.category.to_string(),
                listing.latitude.to_string(),
                listing.longitude.to_string(),
                listing.rating.map(|r| r.to_string()).unwrap_or_default(),
                listing.employees.clone().unwrap_or_default(),
                listing.founded.map(|f| f.to_string()).unwrap_or_default(),
                embedding,
                listing.created_at.to_rfc3339(),
                listing.updated_at.to_rfc3339(),
            ])?;
        }
        csv_wrt.flush()?;
        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}

impl ListingStore for BackendCsv {
    fn search(&self, filter: Option<&str>) -> anyhow::Result<Vec<Listing>> {
        let listings = self.list.read().map_err(|_| anyhow!("listings lock poisoned"))?;

        let mut result: Vec<Listing> = match filter.map(str::trim).filter(|f| !f.is_empty()) {
            Some(needle) => listings
                .iter()
                .filter(|l| matches_filter(l, needle))
                .cloned()
                .collect(),
            None => listings.clone(),
        };

        // newest first
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(result)
    }

    fn get(&self, id: &Eid) -> anyhow::Result<Option<Listing>> {
        let listings = self.list.read().map_err(|_| anyhow!("listings lock poisoned"))?;
        Ok(listings.iter().find(|l| &l.id == id).cloned())
    }

    fn create(&self, new: NewListing) -> anyhow::Result<Listing> {
        let now = Utc::now();
        let listing = Listing {
            id: Eid::new(),
            name: new.name,
            description: new.description,
            address: new.address,
            phone: new.phone,
            website: new.website,
            email: new.email,
            category: new.category,
            latitude: new.latitude,
            longitude: new.longitude,
            rating: new.rating,
            employees: new.employees,
            founded: new.founded,
            embedding: None,
            created_at: now,
            updated_at: now,
        };

        self.list
            .write()
            .map_err(|_| anyhow!("listings lock poisoned"))?
            .push(listing.clone());
        self.save()?;

        Ok(listing)
    }

    fn update(&self, id: &Eid, update: ListingUpdate) -> anyhow::Result<Option<Listing>> {
        let updated = {
            let mut listings = self.list.write().map_err(|_| anyhow!("listings lock poisoned"))?;
            let Some(listing) = listings.iter_mut().find(|l| &l.id == id) else {
                return Ok(None);
            };

            if let Some(name) = update.name {
                listing.name = name;
            }
            if let Some(description) = update.description {
                listing.description = Some(description);
            }
            if let Some(address) = update.address {
                listing.address = address;
            }
            if let Some(phone) = update.phone {
                listing.phone = phone;
            }
            if let Some(website) = update.website {
                listing.website = Some(website);
            }
            if let Some(email) = update.email {
                listing.email = Some(email);
            }
            if let Some(rating) = update.rating {
                listing.rating = Some(rating);
            }
            listing.updated_at = Utc::now();

            listing.clone()
        };

        self.save()?;
        Ok(Some(updated))
    }

    fn delete(&self, id: &Eid) -> anyhow::Result<bool> {
        let removed = {
            let mut listings = self.list.write().map_err(|_| anyhow!("listings lock poisoned"))?;
            let before = listings.len();
            listings.retain(|l| &l.id != id);
            listings.len() != before
        };

        if removed {
            self.save()?;
        }

        Ok(removed)
    }

    fn set_embedding(&self, id: &Eid, embedding: Vec<f32>) -> anyhow::Result<()> {
        {
            let mut listings = self.list.write().map_err(|_| anyhow!("listings lock poisoned"))?;
            let listing = listings
                .iter_mut()
                .find(|l| &l.id == id)
                .ok_or_else(|| anyhow!("listing {id} not found"))?;
            listing.embedding = Some(embedding);
            listing.updated_at = Utc::now();
        }

        self.save()
    }

    fn embedded(&self) -> anyhow::Result<Vec<Listing>> {
        let listings = self.list.read().map_err(|_| anyhow!("listings lock poisoned"))?;
        Ok(listings
            .iter()
            .filter(|l| l.embedding.is_some())
            .cloned()
            .collect())
    }
}
