//! Name pools used to substitute speakers and personal information.

use rand::seq::SliceRandom;
use rand::Rng;

pub const FIRST_NAMES: &[&str] = &[
    "Aaron", "Abigail", "Alan", "Alice", "Amanda", "Andrew", "Angela", "Anna", "April", "Arthur",
    "Barbara", "Benjamin", "Betty", "Brandon", "Brian", "Carl", "Carol", "Catherine", "Charles",
    "Christine", "Claire", "Daniel", "David", "Deborah", "Dennis", "Diane", "Donald", "Dorothy",
    "Edward", "Elizabeth", "Emily", "Eric", "Frank", "Gary", "George", "Grace", "Gregory", "Helen",
    "Henry", "Jack", "Jacob", "James", "Janet", "Jason", "Jean", "Jennifer", "Jerome", "Jessica",
    "Joan", "John", "Joseph", "Joyce", "Judith", "Julia", "Karen", "Kevin", "Laura", "Lawrence",
    "Linda", "Lisa", "Louis", "Margaret", "Maria", "Marie", "Mark", "Martha", "Mary", "Matthew",
    "Michael", "Nancy", "Nicole", "Patricia", "Paul", "Peter", "Philip", "Rachel", "Raymond",
    "Rebecca", "Richard", "Robert", "Rose", "Ruth", "Samuel", "Sandra", "Sarah", "Scott", "Sharon",
    "Stephen", "Susan", "Ted", "Teresa", "Thomas", "Victoria", "Walter", "William",
];

pub const LAST_NAMES: &[&str] = &[
    "Adams", "Allen", "Bailey", "Baker", "Bell", "Bennett", "Brooks", "Brown", "Campbell", "Carter",
    "Clark", "Collins", "Cook", "Cooper", "Davis", "Edwards", "Evans", "Fisher", "Foster", "Garcia",
    "Gray", "Green", "Hall", "Harris", "Hayes", "Hill", "Howard", "Hughes", "Jackson", "James",
    "Jenkins", "Johnson", "Kelly", "King", "Lee", "Lewis", "Martin", "Miller", "Mitchell", "Moore",
    "Morgan", "Morris", "Murphy", "Neal", "Nelson", "Parker", "Perry", "Phillips", "Powell", "Price",
    "Reed", "Roberts", "Rogers", "Ross", "Rottenberg", "Russell", "Sanders", "Scott", "Smith",
    "Stewart", "Sullivan", "Taylor", "Thompson", "Turner", "Walker", "Ward", "Watson", "White",
    "Wilson", "Wood", "Wright", "Young",
];

pub fn first_name<R: Rng>(rng: &mut R) -> &'static str {
    FIRST_NAMES.choose(rng).copied().unwrap_or_default()
}

pub fn full_name<R: Rng>(rng: &mut R) -> String {
    let first = first_name(rng);
    let last = LAST_NAMES.choose(rng).copied().unwrap_or_default();
    format!("{first} {last}")
}
