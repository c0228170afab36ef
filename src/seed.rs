//! Demo dataset for the `seed` subcommand.

use crate::listings::{Category, ListingStore, NewListing};
use std::sync::Arc;

fn demo(
    name: &str,
    description: &str,
    address: &str,
    phone: &str,
    category: Category,
    latitude: f64,
    longitude: f64,
    rating: f64,
) -> NewListing {
    NewListing {
        name: name.to_string(),
        description: Some(description.to_string()),
        address: address.to_string(),
        phone: phone.to_string(),
        website: None,
        email: None,
        category,
        latitude,
        longitude,
        rating: Some(rating),
        employees: None,
        founded: None,
    }
}

pub fn demo_listings() -> Vec<NewListing> {
    vec![
        demo(
            "Modern Nomads",
            "Traditional Mongolian cuisine in a contemporary setting",
            "Sukhbaatar Square 1, Ulaanbaatar",
            "+976-11-318744",
            Category::Restaurant,
            47.9187,
            106.9177,
            4.5,
        ),
        demo(
            "State Department Store",
            "The city's landmark department store with six floors of retail",
            "Peace Avenue 44, Ulaanbaatar",
            "+976-11-319292",
            Category::Store,
            47.9165,
            106.9057,
            4.2,
        ),
        demo(
            "Nomin Express Laundry",
            "Same-day laundry and dry cleaning service",
            "Seoul Street 12, Ulaanbaatar",
            "+976-11-345601",
            Category::Service,
            47.9121,
            106.9234,
            4.0,
        ),
        demo(
            "Unitel Tech Hub",
            "Software development and IT consulting",
            "Chinggis Avenue 9, Ulaanbaatar",
            "+976-11-333000",
            Category::Technology,
            47.9102,
            106.9320,
            4.7,
        ),
        demo(
            "Intermed Hospital",
            "Private hospital with international-standard diagnostics",
            "Chinggis Avenue 41, Ulaanbaatar",
            "+976-11-701111",
            Category::Healthcare,
            47.9015,
            106.9355,
            4.6,
        ),
        demo(
            "Hazara Restaurant",
            "North Indian tandoori kitchen, a long-standing local favourite",
            "Peace Avenue 16, Ulaanbaatar",
            "+976-11-480214",
            Category::Restaurant,
            47.9179,
            106.9401,
            4.4,
        ),
        demo(
            "Mary & Martha Fair Trade",
            "Handmade crafts and felt products from herder cooperatives",
            "Peace Avenue 22, Ulaanbaatar",
            "+976-11-320001",
            Category::Store,
            47.9158,
            106.9123,
            4.3,
        ),
        demo(
            "Songdo Dental Clinic",
            "General and cosmetic dentistry",
            "Olympic Street 5, Ulaanbaatar",
            "+976-11-462200",
            Category::Healthcare,
            47.9140,
            106.9289,
            4.1,
        ),
    ]
}

/// Insert the demo dataset, skipping entries whose name already exists
/// so the command stays idempotent.
pub fn run(listings: Arc<dyn ListingStore>) -> anyhow::Result<usize> {
    let existing = listings.search(None)?;
    let mut inserted = 0;

    for new in demo_listings() {
        if existing.iter().any(|l| l.name == new.name) {
            log::debug!("seed: \"{}\" already present, skipping", new.name);
            continue;
        }
        let listing = listings.create(new)?;
        log::info!("seed: created \"{}\" ({})", listing.name, listing.id);
        inserted += 1;
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listings::BackendCsv;
    use tempfile::TempDir;

    #[test]
    fn test_seed_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("listings.csv");
        let store = Arc::new(BackendCsv::load(path.to_str().unwrap()).unwrap());

        let first = run(store.clone()).unwrap();
        assert_eq!(first, demo_listings().len());

        let second = run(store.clone()).unwrap();
        assert_eq!(second, 0);

        let all = store.search(None).unwrap();
        assert_eq!(all.len(), demo_listings().len());
    }
}
