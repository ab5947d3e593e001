diesel::table! {
    pairings (id) {
        id -> Text,
        mentor_uid -> Text,
        student_uid -> Text,
        status -> Text,
        mentor_handle -> Nullable<Text>,
        student_handle -> Nullable<Text>,
        mentor_kind -> Nullable<Text>,
        request_message -> Nullable<Text>,
        decline_reason -> Nullable<Text>,
        requested_at -> Text,
        responded_at -> Nullable<Text>,
        ended_at -> Nullable<Text>,
    }
}

diesel::table! {
    mentor_directory (mentor_uid) {
        mentor_uid -> Text,
        display_name -> Nullable<Text>,
        mentor_kind -> Nullable<Text>,
        active -> Bool,
        capacity -> Integer,
        active_students -> Integer,
        available_slots -> Integer,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(pairings, mentor_directory);
