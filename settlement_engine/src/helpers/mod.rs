mod codes;

pub use codes::{random_code, unique_code, unique_code_with, CREDIT_CODE_PREFIX, PAYMENT_CODE_PREFIX};
