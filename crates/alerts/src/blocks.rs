use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    Plain { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }

    pub fn raw(&self) -> &str {
        match self {
            Self::Plain { text } | Self::Mrkdwn { text } => text,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: TextObject },
    Context { block_id: String, elements: Vec<TextObject> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

impl MessageTemplate {
    /// All rendered text, for sinks (and tests) that only care about
    /// content.
    pub fn full_text(&self) -> String {
        let mut parts = vec![self.fallback_text.clone()];
        for block in &self.blocks {
            match block {
                Block::Section { text, .. } => parts.push(text.raw().to_string()),
                Block::Context { elements, .. } => {
                    parts.extend(elements.iter().map(|element| element.raw().to_string()));
                }
            }
        }
        parts.join("\n")
    }
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section(mut self, block_id: impl Into<String>, text: TextObject) -> Self {
        self.blocks.push(Block::Section { block_id: block_id.into(), text });
        self
    }

    pub fn context(mut self, block_id: impl Into<String>, elements: Vec<TextObject>) -> Self {
        self.blocks.push(Block::Context { block_id: block_id.into(), elements });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[cfg(test)]
mod tests {
    use super::{MessageBuilder, TextObject};

    #[test]
    fn builder_assembles_blocks_in_order() {
        let template = MessageBuilder::new("fallback")
            .section("headline", TextObject::mrkdwn("*Rollback applied*"))
            .context("meta", vec![TextObject::plain("change 42"), TextObject::plain("cust-1")])
            .build();

        assert_eq!(template.blocks.len(), 2);
        let text = template.full_text();
        assert!(text.contains("fallback"));
        assert!(text.contains("Rollback applied"));
        assert!(text.contains("change 42"));
    }

    #[test]
    fn serialization_tags_block_types() {
        let template = MessageBuilder::new("fallback")
            .section("headline", TextObject::plain("hello"))
            .build();

        let json = serde_json::to_string(&template).expect("serialize");
        assert!(json.contains("\"type\":\"section\""));
        assert!(json.contains("\"type\":\"plain\""));
    }
}
