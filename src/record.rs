use url::{Position, Url};

/// CSV cell written when a field is legitimately missing from the page.
pub const ABSENT_CELL: &str = "NA";
/// CSV cell written when an extraction rule failed.
pub const ERROR_CELL: &str = "#ERROR";

/// Column order of the primary output file. `Record::row` must match.
pub const HEADERS: [&str; 14] = [
    "URL",
    "Title",
    "Author",
    "Format",
    "Summary",
    "Print Length",
    "ASIN",
    "Publisher",
    "Publication Date",
    "Best Sellers Rank",
    "Amazon Rating",
    "Amazon # of Ratings",
    "Goodreads Rating",
    "Goodreads # of Ratings",
];

/// Outcome of a single field rule. `Absent` means the page genuinely lacks
/// the field; `Error` means the rule itself failed (element expected but
/// missing, unparseable text). Only `Error` counts against validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Present(String),
    Absent,
    Error(String),
}

impl Field {
    pub fn is_error(&self) -> bool {
        matches!(self, Field::Error(_))
    }

    pub fn cell(&self) -> &str {
        match self {
            Field::Present(v) => v,
            Field::Absent => ABSENT_CELL,
            Field::Error(_) => ERROR_CELL,
        }
    }
}

/// One scraped product page. Immutable once built; either appended to the
/// output CSV or discarded when the target goes back on the failure list.
#[derive(Debug, Clone)]
pub struct Record {
    pub url: String,
    pub title: Field,
    pub author: Field,
    pub format: Field,
    pub summary: Field,
    pub print_length: Field,
    pub asin: Field,
    pub publisher: Field,
    pub publication_date: Field,
    pub best_sellers_rank: Field,
    pub rating: Field,
    pub rating_count: Field,
    pub goodreads_rating: Field,
    pub goodreads_rating_count: Field,
}

impl Record {
    /// Cells in `HEADERS` order.
    pub fn row(&self) -> Vec<String> {
        [
            self.url.as_str(),
            self.title.cell(),
            self.author.cell(),
            self.format.cell(),
            self.summary.cell(),
            self.print_length.cell(),
            self.asin.cell(),
            self.publisher.cell(),
            self.publication_date.cell(),
            self.best_sellers_rank.cell(),
            self.rating.cell(),
            self.rating_count.cell(),
            self.goodreads_rating.cell(),
            self.goodreads_rating_count.cell(),
        ]
        .iter()
        .map(|c| c.to_string())
        .collect()
    }

    /// Minimum-completeness policy: a record is worth keeping when at least
    /// 3 of the 5 important fields did not error out.
    pub fn is_valid(&self) -> bool {
        let important = [
            &self.title,
            &self.author,
            &self.format,
            &self.asin,
            &self.rating,
        ];
        important.iter().filter(|f| !f.is_error()).count() >= 3
    }
}

/// Canonical form of a product URL: tracking (`/ref…`) suffix and query
/// stripped, exactly one trailing slash. Idempotent, so records written
/// across runs key on the same identifier.
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    let Ok(parsed) = Url::parse(raw) else {
        return raw.to_string();
    };
    let path = parsed.path();
    let cut = path.find("/ref").map_or(path, |i| &path[..i]);
    let cut = cut.trim_end_matches('/');
    format!("{}{}/", &parsed[..Position::BeforePath], cut)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn all_present() -> Record {
        let p = |v: &str| Field::Present(v.to_string());
        Record {
            url: "https://www.amazon.com/dp/B000000000/".into(),
            title: p("A Book"),
            author: p("Someone"),
            format: p("Kindle Edition"),
            summary: p("About a book."),
            print_length: p("312"),
            asin: p("B000000000"),
            publisher: p("Acme Press"),
            publication_date: p("01/02/2024"),
            best_sellers_rank: p("#1 in Books"),
            rating: p("4.5"),
            rating_count: p("1,234"),
            goodreads_rating: Field::Absent,
            goodreads_rating_count: Field::Absent,
        }
    }

    #[test]
    fn normalize_strips_ref_suffix() {
        assert_eq!(
            normalize_url("https://www.amazon.com/Some-Book/dp/B01ABC/ref=sr_1_1?keywords=x"),
            "https://www.amazon.com/Some-Book/dp/B01ABC/"
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        let urls = [
            "https://www.amazon.com/Some-Book/dp/B01ABC/ref=sr_1_1",
            "https://www.amazon.com/Some-Book/dp/B01ABC",
            "https://www.amazon.com/",
            "https://www.amazon.com",
        ];
        for u in urls {
            let once = normalize_url(u);
            assert_eq!(normalize_url(&once), once, "not idempotent for {u}");
        }
    }

    #[test]
    fn normalize_ref_equals_trailing_slash() {
        assert_eq!(
            normalize_url("https://site.test/x/ref=y"),
            normalize_url("https://site.test/x/")
        );
    }

    #[test]
    fn valid_with_exactly_three_important_fields() {
        let mut r = all_present();
        r.format = Field::Error("missing".into());
        r.asin = Field::Error("missing".into());
        assert!(r.is_valid());
    }

    #[test]
    fn invalid_with_only_two_important_fields() {
        let mut r = all_present();
        r.format = Field::Error("missing".into());
        r.asin = Field::Error("missing".into());
        r.rating = Field::Error("missing".into());
        assert!(!r.is_valid());
    }

    #[test]
    fn absent_counts_toward_validity() {
        let mut r = all_present();
        r.title = Field::Error("missing".into());
        r.author = Field::Error("missing".into());
        r.format = Field::Absent;
        // format Absent + asin + rating present = 3 non-error
        assert!(r.is_valid());
    }

    #[test]
    fn row_matches_header_order_and_sentinels() {
        let mut r = all_present();
        r.publisher = Field::Error("boom".into());
        let row = r.row();
        assert_eq!(row.len(), HEADERS.len());
        assert_eq!(row[7], ERROR_CELL);
        assert_eq!(row[12], ABSENT_CELL);
        assert_eq!(row[1], "A Book");
    }
}
