use serde::{Deserialize, Serialize};

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    PartialEq,
    Serialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum Lang {
    #[default]
    #[strum(serialize = "en")]
    En,

    #[strum(serialize = "cn", serialize = "zh")]
    Cn,
}

impl Lang {
    pub fn unauthorized(&self) -> &'static str {
        match self {
            Lang::En => {
                "Unauthorized access, please enter access code in auth page, or enter your OpenAI API Key."
            }
            Lang::Cn => {
                "访问密码不正确或为空，请前往登录页输入正确的访问密码，或者在设置页填入你自己的 OpenAI API Key。"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_lang_from_str() {
        assert_eq!(Lang::from_str("EN").unwrap(), Lang::En);
        assert_eq!(Lang::from_str("zh").unwrap(), Lang::Cn);
        assert!(Lang::from_str("fr").is_err());
        assert!(Lang::Cn.unauthorized().contains("API Key"));
    }
}
