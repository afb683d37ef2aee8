use rand::seq::SliceRandom;
use serde::Serialize;

/// Allowed deck sizes.
pub const CARD_COUNT_CHOICES: [u32; 5] = [20, 30, 40, 50, 60];

pub fn valid_card_count(count: u32) -> bool {
    CARD_COUNT_CHOICES.contains(&count)
}

/// One entry of the fixed flag catalogue.
#[derive(Debug, Clone, Copy)]
pub struct Country {
    pub key: &'static str,
    pub flag: &'static str,
    pub name_ko: &'static str,
}

/// Process-wide, immutable catalogue. Large enough for the biggest deck
/// (60 cards = 30 distinct countries).
pub const COUNTRIES: &[Country] = &[
    Country { key: "kr", flag: "🇰🇷", name_ko: "대한민국" },
    Country { key: "jp", flag: "🇯🇵", name_ko: "일본" },
    Country { key: "cn", flag: "🇨🇳", name_ko: "중국" },
    Country { key: "us", flag: "🇺🇸", name_ko: "미국" },
    Country { key: "gb", flag: "🇬🇧", name_ko: "영국" },
    Country { key: "fr", flag: "🇫🇷", name_ko: "프랑스" },
    Country { key: "de", flag: "🇩🇪", name_ko: "독일" },
    Country { key: "it", flag: "🇮🇹", name_ko: "이탈리아" },
    Country { key: "es", flag: "🇪🇸", name_ko: "스페인" },
    Country { key: "ca", flag: "🇨🇦", name_ko: "캐나다" },
    Country { key: "au", flag: "🇦🇺", name_ko: "호주" },
    Country { key: "br", flag: "🇧🇷", name_ko: "브라질" },
    Country { key: "in", flag: "🇮🇳", name_ko: "인도" },
    Country { key: "ru", flag: "🇷🇺", name_ko: "러시아" },
    Country { key: "mx", flag: "🇲🇽", name_ko: "멕시코" },
    Country { key: "nl", flag: "🇳🇱", name_ko: "네덜란드" },
    Country { key: "se", flag: "🇸🇪", name_ko: "스웨덴" },
    Country { key: "no", flag: "🇳🇴", name_ko: "노르웨이" },
    Country { key: "fi", flag: "🇫🇮", name_ko: "핀란드" },
    Country { key: "dk", flag: "🇩🇰", name_ko: "덴마크" },
    Country { key: "ch", flag: "🇨🇭", name_ko: "스위스" },
    Country { key: "at", flag: "🇦🇹", name_ko: "오스트리아" },
    Country { key: "be", flag: "🇧🇪", name_ko: "벨기에" },
    Country { key: "pt", flag: "🇵🇹", name_ko: "포르투갈" },
    Country { key: "gr", flag: "🇬🇷", name_ko: "그리스" },
    Country { key: "tr", flag: "🇹🇷", name_ko: "튀르키예" },
    Country { key: "pl", flag: "🇵🇱", name_ko: "폴란드" },
    Country { key: "cz", flag: "🇨🇿", name_ko: "체코" },
    Country { key: "hu", flag: "🇭🇺", name_ko: "헝가리" },
    Country { key: "ie", flag: "🇮🇪", name_ko: "아일랜드" },
    Country { key: "nz", flag: "🇳🇿", name_ko: "뉴질랜드" },
    Country { key: "ar", flag: "🇦🇷", name_ko: "아르헨티나" },
    Country { key: "cl", flag: "🇨🇱", name_ko: "칠레" },
    Country { key: "th", flag: "🇹🇭", name_ko: "태국" },
    Country { key: "vn", flag: "🇻🇳", name_ko: "베트남" },
    Country { key: "ph", flag: "🇵🇭", name_ko: "필리핀" },
    Country { key: "id", flag: "🇮🇩", name_ko: "인도네시아" },
    Country { key: "my", flag: "🇲🇾", name_ko: "말레이시아" },
    Country { key: "sg", flag: "🇸🇬", name_ko: "싱가포르" },
    Country { key: "eg", flag: "🇪🇬", name_ko: "이집트" },
    Country { key: "za", flag: "🇿🇦", name_ko: "남아프리카 공화국" },
];

/// One face-down card. `uid` is unique within a deck and stable across the
/// life of a game.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub uid: u32,
    pub country_key: &'static str,
    pub flag: &'static str,
    pub name_ko: &'static str,
    pub matched: bool,
}

/// Build a shuffled deck of `card_count` cards: `card_count / 2` distinct
/// countries sampled uniformly from the catalogue, two cards each.
pub fn build_deck(card_count: u32) -> Vec<Card> {
    let mut rng = rand::rng();

    let mut pool: Vec<&Country> = COUNTRIES.iter().collect();
    pool.shuffle(&mut rng);

    let pairs = (card_count / 2) as usize;
    let mut cards: Vec<Card> = Vec::with_capacity(pairs * 2);
    for country in pool.into_iter().take(pairs) {
        for _ in 0..2 {
            cards.push(Card {
                uid: 0,
                country_key: country.key,
                flag: country.flag,
                name_ko: country.name_ko,
                matched: false,
            });
        }
    }
    cards.shuffle(&mut rng);
    for (i, card) in cards.iter_mut().enumerate() {
        card.uid = i as u32;
    }
    cards
}
