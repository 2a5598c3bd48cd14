//! In-memory matching for listing search.
//!
//! The store has no full-text index, so term searches fetch the whole
//! collection ordered by `created_at` and filter here. Equality filters are
//! also applied here for the paginated no-term mode, which means a page can
//! come back short even when more matches exist further on.

use crate::models::Business;

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub category: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
}

/// Category is exact; a province filter also matches nationwide listings;
/// a city filter matches only non-national listings with that exact city.
pub fn matches_filters(business: &Business, filters: &SearchFilters) -> bool {
    if let Some(category) = &filters.category {
        if &business.category != category {
            return false;
        }
    }
    if let Some(province) = &filters.province {
        if !business.location.is_national
            && business.location.province.as_deref() != Some(province.as_str())
        {
            return false;
        }
    }
    if let Some(city) = &filters.city {
        if business.location.is_national
            || business.location.city.as_deref() != Some(city.as_str())
        {
            return false;
        }
    }
    true
}

/// Case-insensitive substring match over name or description.
/// `term_lower` must already be lowercased and trimmed.
pub fn matches_term(business: &Business, term_lower: &str) -> bool {
    business.name.to_lowercase().contains(term_lower)
        || business.description.to_lowercase().contains(term_lower)
}

/// Term-search mode: filter the full collection (already ordered newest
/// first) by term and filters, then truncate to the page size.
pub fn filter_page(
    businesses: Vec<Business>,
    term: &str,
    filters: &SearchFilters,
    page_size: usize,
) -> Vec<Business> {
    let term_lower = term.trim().to_lowercase();
    businesses
        .into_iter()
        .filter(|b| matches_term(b, &term_lower))
        .filter(|b| matches_filters(b, filters))
        .take(page_size)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BusinessLocation, ContactInfo};
    use chrono::Utc;
    use uuid::Uuid;

    fn listing(name: &str, description: &str, category: &str, location: BusinessLocation) -> Business {
        let now = Utc::now();
        Business {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            category: category.into(),
            location,
            contact_info: ContactInfo {
                whatsapp: "0991234567".into(),
                email: None,
                instagram: None,
            },
            images: Vec::new(),
            rating: 0.0,
            reviews: Vec::new(),
            owner_id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    fn in_city(province: &str, city: &str) -> BusinessLocation {
        BusinessLocation {
            is_national: false,
            province: Some(province.into()),
            city: Some(city.into()),
        }
    }

    fn national() -> BusinessLocation {
        BusinessLocation {
            is_national: true,
            province: None,
            city: None,
        }
    }

    #[test]
    fn term_matches_name_or_description_case_insensitive() {
        let quito = listing(
            "Pizzería Don Luigi",
            "La mejor PIZZA de Quito",
            "restaurantes",
            in_city("Pichincha", "Quito"),
        );
        assert!(matches_term(&quito, "pizza"));
        assert!(matches_term(&quito, "luigi"));
        assert!(!matches_term(&quito, "sushi"));
    }

    #[test]
    fn province_filter_includes_nationwide_listings() {
        let filters = SearchFilters {
            province: Some("Pichincha".into()),
            ..Default::default()
        };
        assert!(matches_filters(
            &listing("A", "d", "restaurantes", in_city("Pichincha", "Quito")),
            &filters
        ));
        assert!(matches_filters(
            &listing("B", "d", "restaurantes", national()),
            &filters
        ));
        assert!(!matches_filters(
            &listing("C", "d", "restaurantes", in_city("Guayas", "Guayaquil")),
            &filters
        ));
    }

    #[test]
    fn city_filter_excludes_nationwide_listings() {
        let filters = SearchFilters {
            city: Some("Quito".into()),
            ..Default::default()
        };
        assert!(matches_filters(
            &listing("A", "d", "restaurantes", in_city("Pichincha", "Quito")),
            &filters
        ));
        assert!(!matches_filters(
            &listing("B", "d", "restaurantes", national()),
            &filters
        ));
    }

    #[test]
    fn term_search_combines_filters_and_truncates() {
        let businesses = vec![
            listing(
                "Pizzería Don Luigi",
                "Pizza al horno de leña",
                "restaurantes",
                in_city("Pichincha", "Quito"),
            ),
            listing(
                "Envíos Pizza Nacional",
                "Pizza congelada a todo el país",
                "restaurantes",
                national(),
            ),
            listing(
                "Pizza Costa",
                "Pizza en la playa",
                "restaurantes",
                in_city("Guayas", "Guayaquil"),
            ),
            listing(
                "Sushi Bar",
                "Sushi fresco",
                "restaurantes",
                in_city("Pichincha", "Quito"),
            ),
        ];

        let filters = SearchFilters {
            province: Some("Pichincha".into()),
            ..Default::default()
        };
        let page = filter_page(businesses, "pizza", &filters, 12);

        let names: Vec<&str> = page.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Pizzería Don Luigi", "Envíos Pizza Nacional"]);
    }

    #[test]
    fn page_size_caps_results() {
        let businesses: Vec<Business> = (0..5)
            .map(|i| {
                listing(
                    &format!("Pizza {i}"),
                    "pizza",
                    "restaurantes",
                    in_city("Pichincha", "Quito"),
                )
            })
            .collect();
        let page = filter_page(businesses, "pizza", &SearchFilters::default(), 3);
        assert_eq!(page.len(), 3);
    }
}
