use std::sync::LazyLock;

use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};

use crate::challenge;
use crate::record::{normalize_url, Field, Record};

macro_rules! sel {
    ($name:ident, $css:expr) => {
        static $name: LazyLock<Selector> = LazyLock::new(|| Selector::parse($css).unwrap());
    };
}

sel!(TITLE, "#productTitle");
sel!(AUTHOR, "#bylineInfo a");
sel!(FORMAT, "#bylineInfo span.a-color-secondary ~ span");
sel!(SUMMARY, ".a-expander-content");
sel!(PRINT_LENGTH, "#rpi-attribute-book_details-ebook_pages .rpi-attribute-value span");
sel!(PUB_DATE, "#rpi-attribute-book_details-publication_date .rpi-attribute-value span");
sel!(RANK, ".zg_hrsr .a-list-item");
sel!(RATING, ".a-icon-alt");
sel!(RATING_COUNT, "#acrCustomerReviewText");
sel!(GOODREADS_BLOCK, "div.gr-review-base");
sel!(GOODREADS_RATING, "div.gr-review-rating-text span");
sel!(GOODREADS_COUNT, "div.gr-review-count-text span");
sel!(SPAN, "span");

/// Result of running the field rules against one rendered page.
pub enum Extraction {
    Record(Record),
    /// The page is an interstitial; no record can be built. The caller owns
    /// resolution and the retry.
    Challenge,
}

/// Build a record from rendered page source. Each field rule is independent:
/// one rule failing marks only its own field and never aborts a sibling.
pub fn extract(content: &str, url: &str) -> Extraction {
    if challenge::detect(content) {
        return Extraction::Challenge;
    }

    let doc = Html::parse_document(content);
    let (goodreads_rating, goodreads_rating_count) = goodreads(&doc);

    Extraction::Record(Record {
        url: normalize_url(url),
        title: required(&doc, &TITLE, "title"),
        author: required(&doc, &AUTHOR, "author"),
        format: required(&doc, &FORMAT, "format"),
        summary: optional(&doc, &SUMMARY),
        print_length: first_token(optional(&doc, &PRINT_LENGTH), "print length"),
        asin: label_value(&doc, "ASIN"),
        publisher: label_value(&doc, "Publisher"),
        publication_date: publication_date(&doc),
        best_sellers_rank: required(&doc, &RANK, "best sellers rank"),
        rating: first_token(required(&doc, &RATING, "rating"), "rating"),
        rating_count: first_token(required(&doc, &RATING_COUNT, "rating count"), "rating count"),
        goodreads_rating,
        goodreads_rating_count,
    })
}

fn text_of(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Anchor expected on every real product page: a miss is an extraction error.
fn required(doc: &Html, sel: &Selector, what: &str) -> Field {
    match doc.select(sel).next() {
        Some(el) => Field::Present(text_of(el)),
        None => Field::Error(format!("{what} element not found")),
    }
}

/// Anchor the page may legitimately lack: a miss is a normal absence.
fn optional(doc: &Html, sel: &Selector) -> Field {
    match doc.select(sel).next() {
        Some(el) => Field::Present(text_of(el)),
        None => Field::Absent,
    }
}

/// Keep only the first whitespace-delimited token ("4.5 out of 5 stars",
/// "1,234 ratings", "312 pages"). Relies on the site putting the value first.
fn first_token(field: Field, what: &str) -> Field {
    match field {
        Field::Present(text) => match text.split_whitespace().next() {
            Some(tok) => Field::Present(tok.to_string()),
            None => Field::Error(format!("empty {what} text")),
        },
        other => other,
    }
}

/// Detail rows label their value in the next `<span>` after the label span
/// in document order (ASIN, Publisher). Only leaf spans count: detail
/// bullets nest both label and value inside a wrapper span whose text would
/// otherwise match the label first.
fn label_value(doc: &Html, label: &str) -> Field {
    let spans: Vec<ElementRef> = doc
        .select(&SPAN)
        .filter(|s| s.select(&SPAN).next().is_none())
        .collect();
    let Some(idx) = spans.iter().position(|s| text_of(*s).contains(label)) else {
        return Field::Absent;
    };
    match spans.get(idx + 1) {
        Some(el) => Field::Present(text_of(*el)),
        None => Field::Error(format!("no value span after {label} label")),
    }
}

fn publication_date(doc: &Html) -> Field {
    let Some(el) = doc.select(&PUB_DATE).next() else {
        return Field::Absent;
    };
    let text = text_of(el);
    match parse_date(&text) {
        Some(date) => Field::Present(date.format("%m/%d/%Y").to_string()),
        None => Field::Error(format!("unparseable publication date {text:?}")),
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    const FORMATS: [&str; 5] = ["%B %d, %Y", "%b %d, %Y", "%Y-%m-%d", "%m/%d/%Y", "%d %B %Y"];
    let s = s.trim();
    FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
}

/// Goodreads data only renders for signed-in sessions. A missing block is a
/// normal absence; a present block with broken innards is an error.
fn goodreads(doc: &Html) -> (Field, Field) {
    let Some(block) = doc.select(&GOODREADS_BLOCK).next() else {
        return (Field::Absent, Field::Absent);
    };

    let rating = match block.select(&GOODREADS_RATING).next() {
        Some(el) => Field::Present(text_of(el)),
        None => Field::Error("goodreads rating text missing".into()),
    };
    let count = match block.select(&GOODREADS_COUNT).next() {
        Some(el) => {
            let text = text_of(el).replace(',', "");
            match text.split_whitespace().next() {
                Some(tok) => Field::Present(tok.to_string()),
                None => Field::Error("empty goodreads count text".into()),
            }
        }
        None => Field::Error("goodreads count text missing".into()),
    };
    (rating, count)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_PAGE: &str = r#"<html><body>
        <span id="productTitle"> The Test Book </span>
        <div id="bylineInfo">
            <a>Jane Writer</a>
            <span class="a-color-secondary">Format:</span>
            <span>Kindle Edition</span>
        </div>
        <div class="a-expander-content">A gripping tale of selectors.</div>
        <div id="rpi-attribute-book_details-ebook_pages">
            <div class="rpi-attribute-value"><span>312 pages</span></div>
        </div>
        <div id="detailBullets">
            <span>ASIN :</span><span>B01TESTBOOK</span>
            <span>Publisher :</span><span>Acme Press</span>
        </div>
        <div id="rpi-attribute-book_details-publication_date">
            <div class="rpi-attribute-value"><span>January 2, 2024</span></div>
        </div>
        <ul class="zg_hrsr"><span class="a-list-item">#12 in Kindle Store</span></ul>
        <span class="a-icon-alt">4.5 out of 5 stars</span>
        <span id="acrCustomerReviewText">1,234 ratings</span>
        <div class="gr-review-base">
            <div class="gr-review-rating-text"><span>4.21</span></div>
            <div class="gr-review-count-text"><span>9,876 ratings on Goodreads</span></div>
        </div>
    </body></html>"#;

    fn record(html: &str) -> Record {
        match extract(html, "https://www.amazon.com/dp/B01TESTBOOK/ref=sr_1_1") {
            Extraction::Record(r) => r,
            Extraction::Challenge => panic!("unexpected challenge"),
        }
    }

    #[test]
    fn full_page_extracts_every_field() {
        let r = record(FULL_PAGE);
        assert_eq!(r.url, "https://www.amazon.com/dp/B01TESTBOOK/");
        assert_eq!(r.title, Field::Present("The Test Book".into()));
        assert_eq!(r.author, Field::Present("Jane Writer".into()));
        assert_eq!(r.format, Field::Present("Kindle Edition".into()));
        assert_eq!(r.print_length, Field::Present("312".into()));
        assert_eq!(r.asin, Field::Present("B01TESTBOOK".into()));
        assert_eq!(r.publisher, Field::Present("Acme Press".into()));
        assert_eq!(r.publication_date, Field::Present("01/02/2024".into()));
        assert_eq!(r.rating, Field::Present("4.5".into()));
        assert_eq!(r.rating_count, Field::Present("1,234".into()));
        assert_eq!(r.goodreads_rating, Field::Present("4.21".into()));
        assert_eq!(r.goodreads_rating_count, Field::Present("9876".into()));
        assert!(r.is_valid());
    }

    #[test]
    fn missing_author_leaves_other_fields_intact() {
        let html = FULL_PAGE.replace("<a>Jane Writer</a>", "");
        let r = record(&html);
        assert!(r.author.is_error());
        assert_eq!(r.title, Field::Present("The Test Book".into()));
        assert_eq!(r.rating, Field::Present("4.5".into()));
    }

    #[test]
    fn optional_fields_absent_vs_required_error() {
        let r = record("<html><body><span id=\"productTitle\">Bare</span></body></html>");
        assert_eq!(r.title, Field::Present("Bare".into()));
        assert!(r.author.is_error());
        assert!(r.rating.is_error());
        assert_eq!(r.summary, Field::Absent);
        assert_eq!(r.asin, Field::Absent);
        assert_eq!(r.publisher, Field::Absent);
        assert_eq!(r.print_length, Field::Absent);
        assert_eq!(r.publication_date, Field::Absent);
    }

    #[test]
    fn label_value_skips_detail_bullet_wrapper_spans() {
        // Real detail bullets nest label and value under a list-item span.
        let html = FULL_PAGE.replace(
            "<span>ASIN :</span><span>B01TESTBOOK</span>",
            "<span class=\"a-list-item\"><span>ASIN :</span> <span>B01REALASIN</span></span>",
        );
        let r = record(&html);
        assert_eq!(r.asin, Field::Present("B01REALASIN".into()));
        // flat markup elsewhere still resolves
        assert_eq!(r.publisher, Field::Present("Acme Press".into()));
    }

    #[test]
    fn goodreads_block_missing_is_absent() {
        let html = FULL_PAGE.replace("gr-review-base", "gr-review-gone");
        let r = record(&html);
        assert_eq!(r.goodreads_rating, Field::Absent);
        assert_eq!(r.goodreads_rating_count, Field::Absent);
    }

    #[test]
    fn goodreads_block_broken_is_error() {
        let html = FULL_PAGE.replace("gr-review-rating-text", "gr-review-rating-nope");
        let r = record(&html);
        assert!(r.goodreads_rating.is_error());
        // count is still extracted independently
        assert_eq!(r.goodreads_rating_count, Field::Present("9876".into()));
    }

    #[test]
    fn bad_publication_date_is_error_not_absent() {
        let html = FULL_PAGE.replace("January 2, 2024", "sometime soon");
        let r = record(&html);
        assert!(r.publication_date.is_error());
    }

    #[test]
    fn challenge_page_short_circuits() {
        let html = "<html><body>Type the characters in this CAPTCHA image</body></html>";
        assert!(matches!(
            extract(html, "https://www.amazon.com/dp/B01TESTBOOK/"),
            Extraction::Challenge
        ));
    }

    #[test]
    fn near_empty_record_fails_validation() {
        let r = record("<html><body><p>Dogs of our neighborhood</p></body></html>");
        assert!(!r.is_valid());
    }
}
