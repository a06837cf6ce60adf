/// 文字度量，布局只依赖这两个量
pub trait TextMeasure {
    fn text_width(&self, text: &str, px: f32) -> f32;
    fn line_height(&self, px: f32) -> f32;
}

/// 按最大宽度折行，不截断任何内容。
///
/// 连续的 ASCII 字符视为一个单词，在空格处断开；中文等字符逐字可断。
/// 单个单词超宽时按字符强制断开。原文中的换行保留为段落分隔。
pub fn wrap_text(text: &str, max_width: f32, px: f32, measure: &dyn TextMeasure) -> Vec<String> {
    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        if paragraph.trim().is_empty() {
            lines.push(String::new());
            continue;
        }

        let mut line = String::new();
        for token in tokenize(paragraph.trim()) {
            let candidate = format!("{}{}", line, token);
            if measure.text_width(candidate.trim_end(), px) <= max_width {
                line = candidate;
                continue;
            }

            if !line.trim().is_empty() {
                lines.push(line.trim_end().to_string());
            }
            line = String::new();

            let token = token.trim_start();
            if measure.text_width(token.trim_end(), px) <= max_width {
                line.push_str(token);
            } else {
                // 超宽单词逐字断开
                for ch in token.chars() {
                    let candidate = format!("{}{}", line, ch);
                    if line.is_empty()
                        || measure.text_width(candidate.trim_end(), px) <= max_width
                    {
                        line = candidate;
                    } else {
                        lines.push(line.trim_end().to_string());
                        line = if ch == ' ' {
                            String::new()
                        } else {
                            ch.to_string()
                        };
                    }
                }
            }
        }

        if !line.trim().is_empty() {
            lines.push(line.trim_end().to_string());
        }
    }

    lines
}

fn tokenize(paragraph: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();

    for ch in paragraph.chars() {
        if ch == ' ' {
            word.push(ch);
            tokens.push(std::mem::take(&mut word));
        } else if ch.is_ascii() {
            word.push(ch);
        } else {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            tokens.push(ch.to_string());
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }

    tokens
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// ASCII 半个字号宽，其余一个字号宽
    pub(crate) struct MonoMeasure;

    impl TextMeasure for MonoMeasure {
        fn text_width(&self, text: &str, px: f32) -> f32 {
            text.chars()
                .map(|c| if c.is_ascii() { px * 0.5 } else { px })
                .sum()
        }

        fn line_height(&self, px: f32) -> f32 {
            px
        }
    }

    fn squash(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn wraps_english_on_word_boundaries() {
        let lines = wrap_text("alpha beta gamma delta", 50.0, 10.0, &MonoMeasure);
        assert_eq!(lines, vec!["alpha beta", "gamma", "delta"]);
    }

    #[test]
    fn wraps_chinese_per_character() {
        let lines = wrap_text("一二三四五六七", 30.0, 10.0, &MonoMeasure);
        assert_eq!(lines, vec!["一二三", "四五六", "七"]);
    }

    #[test]
    fn never_drops_content_and_respects_width() {
        let text = "核心贡献：提出了 SuperLongIdentifierWithoutSpaces 方法，\
                    并在 ImageNet 上验证。\n第二段 mixed 文本";
        let lines = wrap_text(text, 60.0, 10.0, &MonoMeasure);

        assert_eq!(squash(&lines.join("")), squash(text));
        for line in &lines {
            assert!(MonoMeasure.text_width(line, 10.0) <= 60.0, "{line:?}");
        }
    }

    #[test]
    fn keeps_blank_lines_between_paragraphs() {
        let lines = wrap_text("a\n\nb", 100.0, 10.0, &MonoMeasure);
        assert_eq!(lines, vec!["a", "", "b"]);
    }
}
