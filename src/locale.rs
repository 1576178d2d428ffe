//! Localized phrases for spoken alarms and notifications.
//!
//! Records remember the language they were analyzed in; alarm text is built
//! in that language so the spoken reminder matches what the user heard when
//! the prescription was explained. Unknown languages fall back to English.

use crate::records::{Instruction, Medication};

/// The phrase fragments alarm text is assembled from.
pub struct Phrases {
    /// "Time to take your medicine" lead-in.
    pub set_alarm: &'static str,
    /// "It is for" label preceding the purpose.
    pub medicine_purpose: &'static str,
    /// Generic label for instruction entries.
    pub instructions: &'static str,
}

const EN: Phrases = Phrases {
    set_alarm: "Time to take your medicine",
    medicine_purpose: "It is for",
    instructions: "Instructions",
};

/// Look up the phrase table for a language code, falling back to English.
pub fn phrases(lang: &str) -> &'static Phrases {
    match lang {
        "hi" => &Phrases {
            set_alarm: "दवा लेने का समय हो गया है",
            medicine_purpose: "यह इसके लिए है",
            instructions: "निर्देश",
        },
        "bn" => &Phrases {
            set_alarm: "ওষুধ খাওয়ার সময় হয়েছে",
            medicine_purpose: "এটি এর জন্য",
            instructions: "নির্দেশাবলী",
        },
        "ta" => &Phrases {
            set_alarm: "மருந்து எடுக்க வேண்டிய நேரம்",
            medicine_purpose: "இது இதற்காக",
            instructions: "வழிமுறைகள்",
        },
        "te" => &Phrases {
            set_alarm: "మందు తీసుకునే సమయం వచ్చింది",
            medicine_purpose: "ఇది దీని కోసం",
            instructions: "సూచనలు",
        },
        "mr" => &Phrases {
            set_alarm: "औषध घेण्याची वेळ झाली आहे",
            medicine_purpose: "हे यासाठी आहे",
            instructions: "सूचना",
        },
        "ar" => &Phrases {
            set_alarm: "حان وقت تناول الدواء",
            medicine_purpose: "هذا من أجل",
            instructions: "التعليمات",
        },
        "sw" => &Phrases {
            set_alarm: "Ni wakati wa kunywa dawa",
            medicine_purpose: "Ni kwa ajili ya",
            instructions: "Maelekezo",
        },
        _ => &EN,
    }
}

/// Spoken text for a medication alarm, e.g.
/// "Time to take your medicine. Dolo 650. 1 tablet. It is for: Fever"
pub fn medication_speak_text(lang: &str, med: &Medication) -> String {
    let t = phrases(lang);
    let name = if med.name_native.is_empty() {
        &med.name
    } else {
        &med.name_native
    };
    format!(
        "{}. {}. {}. {}: {}",
        t.set_alarm, name, med.dosage, t.medicine_purpose, med.purpose
    )
}

/// Spoken text for an instruction alarm.
pub fn instruction_speak_text(lang: &str, inst: &Instruction) -> String {
    let t = phrases(lang);
    format!("{}. {}: {}", t.set_alarm, t.instructions, inst.description)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_language_falls_back_to_english() {
        assert_eq!(phrases("xx").set_alarm, phrases("en").set_alarm);
    }

    #[test]
    fn native_name_preferred_when_present() {
        let med = Medication {
            name: "Dolo 650".into(),
            name_native: "डोलो ६५०".into(),
            dosage: "1 tablet".into(),
            purpose: "Fever".into(),
            ..Default::default()
        };
        let text = medication_speak_text("hi", &med);
        assert!(text.contains("डोलो ६५०"));
        assert!(!text.contains("Dolo 650"));
        assert!(text.contains("Fever"));
    }

    #[test]
    fn instruction_text_carries_description() {
        let inst = Instruction {
            description: "Drink warm water".into(),
            ..Default::default()
        };
        let text = instruction_speak_text("en", &inst);
        assert!(text.starts_with("Time to take your medicine. Instructions:"));
        assert!(text.contains("Drink warm water"));
    }
}
